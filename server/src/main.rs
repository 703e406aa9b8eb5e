//! Tandem Server - standalone echo server
//!
//! Accepts clients and echoes every game message back to its sender over the same routing
//! the session would use for its own traffic. Handy for trying out a client by hand.
//!
//! # Usage
//!
//! ```bash
//! tandem-server
//! tandem-server --port 14191 --hostname game.example.org
//! tandem-server --keystore ./keys --alias game --password secret
//! RUST_LOG=debug tandem-server --throttle 20
//! ```

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    process, thread,
    time::Duration,
};

use clap::Parser;
use log::{error, info, warn};
use tandem_server::{
    ChannelError, MessageChannel, Server, ServerConfig, ServerError, ServerIdentity, Session,
    ThrottleConfig, DEFAULT_PORT,
};

#[derive(Parser)]
#[command(name = "tandem-server")]
#[command(author, version, about = "Tandem hybrid TLS + UDP echo server")]
struct Args {
    /// Address to listen on, for both TCP and UDP
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on, for both TCP and UDP
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory holding <alias>.cert.der and <alias>.key.der (created on first run)
    #[arg(long)]
    keystore: Option<PathBuf>,

    /// Name of the key pair inside the keystore
    #[arg(long, default_value = "server")]
    alias: String,

    /// Password sealing the private key at rest
    #[arg(long, env = "TANDEM_KEYSTORE_PASSWORD")]
    password: Option<String>,

    /// Host names for a generated certificate (repeatable)
    #[arg(long = "hostname", default_value = "localhost")]
    hostnames: Vec<String>,

    /// Keep the key pair in memory only
    #[arg(long, conflicts_with = "keystore")]
    ephemeral: bool,

    /// Maximum game messages per type and second from each client
    #[arg(long)]
    throttle: Option<u32>,

    /// Do not offer the UDP upgrade
    #[arg(long)]
    no_datagram: bool,

    /// Seconds of silence after which a client is dropped
    #[arg(long, default_value = "15")]
    read_timeout: u64,

    /// Seconds of datagram silence after which a client falls back to TCP
    #[arg(long, default_value = "5")]
    datagram_timeout: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(err) = run(args) {
        error!("{}", err);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), ServerError> {
    let identity = load_identity(&args)?;

    let mut config = ServerConfig {
        bind_addr: SocketAddr::new(args.bind, args.port),
        datagram_enabled: !args.no_datagram,
        throttle: args.throttle.map(ThrottleConfig::per_second),
        ..ServerConfig::default()
    };
    config.connection.read_timeout = Duration::from_secs(args.read_timeout);
    config.connection.datagram_inactivity_timeout = Duration::from_secs(args.datagram_timeout);

    let server = Server::bind(config, identity)?;
    info!(
        "Certificate fingerprint: {}",
        server.identity().fingerprint()
    );

    loop {
        let session = server.accept()?;
        let name = format!("echo-{}", session.peer_addr());
        if let Err(err) = thread::Builder::new()
            .name(name)
            .spawn(move || echo(session))
        {
            warn!("Could not start session thread: {}", err);
        }
    }
}

fn load_identity(args: &Args) -> Result<ServerIdentity, ServerError> {
    if args.ephemeral {
        warn!("Using an in-memory key pair; clients will see a new certificate every run");
        return ServerIdentity::self_signed(&args.hostnames);
    }

    let directory = match &args.keystore {
        Some(directory) => directory.clone(),
        None => match default_keystore() {
            Some(directory) => directory,
            None => {
                warn!("No home directory to keep a keystore in; using an in-memory key pair");
                return ServerIdentity::self_signed(&args.hostnames);
            }
        },
    };

    ServerIdentity::from_keystore(
        &directory,
        &args.alias,
        args.password.as_deref(),
        &args.hostnames,
    )
}

fn default_keystore() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "tandem", "tandem-server")
        .map(|dirs| dirs.data_dir().join("keystore"))
}

fn echo(session: Session) {
    let peer = session.peer_addr();
    info!("Session {} from {} connected", session.id(), peer);

    loop {
        match session.receive_delivery() {
            Ok(delivery) => {
                if delivery.message.kind().is_control() {
                    continue;
                }
                if let Err(err) = session.send(&delivery.message) {
                    info!("Echo to {} failed: {}", peer, err);
                }
            }
            Err(ChannelError::ConnectionLost { reason }) => {
                info!("Session {} from {} ended: {}", session.id(), peer, reason);
                break;
            }
            Err(err) => {
                warn!("Session {} from {} failed: {}", session.id(), peer, err);
                break;
            }
        }
    }

    let stats = session.stats();
    info!(
        "Session {} forwarded {} and throttled {} messages",
        session.id(),
        stats.forwarded,
        stats.throttled
    );
}
