use std::{fmt, sync::Arc, time::Duration};

use rustls::pki_types::CertificateDer;
use tandem_shared::{ConnectionConfig, RoutingPolicy, DEFAULT_PORT};

use crate::bootstrap::TrustRequest;

/// Contains Config properties which will be used by a Client
#[derive(Clone)]
pub struct ClientConfig {
    pub host: String,
    /// Port of both the TLS listener and the datagram endpoint
    pub port: u16,
    pub connection: ConnectionConfig,
    /// Certificate authorities used for the first, automatic trust attempt
    pub trust_anchors: TrustAnchors,
    /// Certificates the user already accepted; a server presenting one of them skips the prompt
    pub pinned_certificates: Vec<CertificateDer<'static>>,
    /// What to do when automatic validation fails
    pub manual_trust: ManualTrust,
    /// Whether to try upgrading the session to hybrid transport
    pub datagram_enabled: bool,
    /// Datagram key establishment attempts per negotiation
    pub datagram_attempts: u32,
    /// Time to wait for each key establishment step
    pub datagram_attempt_timeout: Duration,
    /// Upper bound for each step of the protocol-switch exchange
    pub switch_timeout: Duration,
    pub recovery: RecoveryPolicy,
    pub routing: RoutingPolicy,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            connection: ConnectionConfig::default(),
            trust_anchors: TrustAnchors::Platform,
            pinned_certificates: Vec::new(),
            manual_trust: ManualTrust::Disabled,
            datagram_enabled: true,
            datagram_attempts: 3,
            datagram_attempt_timeout: Duration::from_secs(1),
            switch_timeout: Duration::from_secs(5),
            recovery: RecoveryPolicy::default(),
            routing: RoutingPolicy::default(),
        }
    }
}

/// Roots of trust for automatic certificate validation
#[derive(Clone)]
pub enum TrustAnchors {
    /// The operating system's verifier and certificate store
    Platform,
    /// Only these certificates
    Roots(Vec<CertificateDer<'static>>),
}

/// Callback that receives a [`TrustRequest`] and eventually answers it
pub type TrustPrompt = Arc<dyn Fn(TrustRequest) + Send + Sync>;

/// Fallback when a server certificate cannot be validated automatically
#[derive(Clone)]
pub enum ManualTrust {
    /// Refuse the connection
    Disabled,
    /// Ask the consumer. The bootstrap blocks until the request is answered or dropped.
    Prompt(TrustPrompt),
    /// Skip validation entirely and accept any certificate without asking.
    /// Only for tests on a trusted network.
    AcceptWithoutConfirmation,
}

impl ManualTrust {
    pub fn prompt(callback: impl Fn(TrustRequest) + Send + Sync + 'static) -> Self {
        ManualTrust::Prompt(Arc::new(callback))
    }
}

impl fmt::Debug for ManualTrust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualTrust::Disabled => f.write_str("Disabled"),
            ManualTrust::Prompt(_) => f.write_str("Prompt"),
            ManualTrust::AcceptWithoutConfirmation => f.write_str("AcceptWithoutConfirmation"),
        }
    }
}

/// How hard to try re-establishing a failed datagram channel
#[derive(Clone, Debug)]
pub struct RecoveryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RecoveryPolicy {
    /// Exponential backoff before attempt `attempt` (1-based), with up to 50% random jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);
        let jitter_ms = (base.as_millis() as u64) / 2;
        let jitter = Duration::from_millis(fastrand::u64(0..=jitter_ms));
        base + jitter
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}
