/// END-TO-END SCENARIO C: a flooding client
///
/// A server limiting each message type to two per second forwards exactly two of a burst,
/// drops the rest and tells the client which type it throttled.
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tandem_client::{ClientConfig, Message, MessageChannel, MessageType};
use tandem_server::{Session, SessionStats, ThrottleConfig};
use tandem_test::{connect, eventually, spawn_receiver, trusting_config, TestServer};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn throttled_server() -> TestServer {
    TestServer::with_config(|config| {
        config.throttle = Some(ThrottleConfig::per_second(2));
        config.datagram_enabled = false;
    })
}

fn tcp_only(server: &TestServer) -> ClientConfig {
    ClientConfig {
        datagram_enabled: false,
        ..trusting_config(server)
    }
}

/// Receives on the session continuously, stamping every message with its arrival time
fn collect(session: &Arc<Session>) -> crossbeam_channel::Receiver<(Instant, Message)> {
    let receiving = session.clone();
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        while let Ok(delivery) = receiving.receive_delivery() {
            if tx.send((Instant::now(), delivery.message)).is_err() {
                break;
            }
        }
    });
    rx
}

#[test]
fn flood_is_cut_to_the_limit() {
    init_logger();
    let server = throttled_server();
    let (client, session) = connect(&server, tcp_only(&server));
    let session = Arc::new(session);
    let delivered = collect(&session);

    let update = Message::builder(MessageType::POSITION_UPDATE)
        .doubles(vec![0.0, 0.0])
        .build();
    for _ in 0..10_000 {
        client.send(&update).unwrap();
    }

    assert!(eventually(Duration::from_secs(10), || {
        let stats = session.stats();
        stats.forwarded + stats.throttled == 10_000
    }));
    assert!(eventually(Duration::from_secs(1), || {
        delivered.len() as u64 == session.stats().forwarded
    }));

    let arrivals: Vec<Instant> = delivered.try_iter().map(|(at, _)| at).collect();
    let first = arrivals[0];
    let first_window = arrivals
        .iter()
        .filter(|at| at.duration_since(first) < Duration::from_millis(900))
        .count();
    assert_eq!(first_window, 2);

    let stats = session.stats();
    assert_eq!(stats.forwarded as usize, arrivals.len());
    assert!(stats.throttled >= 9_000);

    // One notice per window, naming the throttled type
    let notice = client.receive().unwrap();
    assert_eq!(notice.kind(), MessageType::MessageTooFrequent);
    assert_eq!(notice.ints(), Some(&[64][..]));
}

#[test]
fn slow_consumer_does_not_widen_the_limit() {
    init_logger();
    let server = throttled_server();
    let (client, session) = connect(&server, tcp_only(&server));

    let update = Message::new(MessageType::POSITION_UPDATE);
    for _ in 0..10 {
        client.send(&update).unwrap();
    }

    // Nobody reads while the burst arrives
    assert!(eventually(Duration::from_secs(3), || {
        let stats = session.stats();
        stats.forwarded + stats.throttled == 10
    }));
    assert_eq!(session.stats().forwarded, 2);

    // Reading slowly, across several windows, yields nothing beyond the two admitted
    for _ in 0..2 {
        std::thread::sleep(Duration::from_millis(600));
        assert_eq!(session.receive_delivery().unwrap().message, update);
    }
    let session = Arc::new(session);
    let receiving = session.clone();
    let rest = spawn_receiver(move || receiving.receive_delivery());
    assert!(rest.recv_timeout(Duration::from_millis(600)).is_err());
    assert_eq!(session.stats(), SessionStats { forwarded: 2, throttled: 8 });
}

#[test]
fn message_types_are_limited_independently() {
    init_logger();
    let server = throttled_server();
    let (client, session) = connect(&server, tcp_only(&server));
    let session = Arc::new(session);
    let delivered = collect(&session);

    for kind in [MessageType::POSITION_UPDATE, MessageType::VIEWPORT_UPDATE] {
        for _ in 0..5 {
            client.send(&Message::new(kind)).unwrap();
        }
    }

    assert!(eventually(Duration::from_secs(5), || {
        let stats = session.stats();
        stats.forwarded + stats.throttled == 10
    }));
    assert!(eventually(Duration::from_secs(1), || delivered.len() == 4));
    let kinds: Vec<MessageType> = delivered.try_iter().map(|(_, message)| message.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            MessageType::POSITION_UPDATE,
            MessageType::POSITION_UPDATE,
            MessageType::VIEWPORT_UPDATE,
            MessageType::VIEWPORT_UPDATE
        ]
    );

    let client_rx = spawn_receiver(move || client.receive_delivery());
    let mut throttled: Vec<i32> = client_rx
        .iter()
        .take(2)
        .map(|delivery| delivery.message.ints().unwrap()[0])
        .collect();
    throttled.sort_unstable();
    assert_eq!(throttled, vec![64, 65]);
}

#[test]
fn unthrottled_server_forwards_everything() {
    init_logger();
    let server = TestServer::with_config(|config| config.datagram_enabled = false);
    let (client, session) = connect(&server, tcp_only(&server));

    for _ in 0..100 {
        client.send(&Message::new(MessageType::POSITION_UPDATE)).unwrap();
    }
    for _ in 0..100 {
        session.receive_delivery().unwrap();
    }

    assert_eq!(session.stats().forwarded, 100);
    assert_eq!(session.stats().throttled, 0);
}
