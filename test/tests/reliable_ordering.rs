/// PROPERTY-BASED TESTS: reliable delivery
///
/// Whatever mix of game messages a client sends over the reliable channel, the server sees
/// every one of them, unchanged and in order.
use proptest::prelude::*;
use tandem_client::{ClientConfig, Message, MessageChannel, MessageType};
use tandem_shared::GameSnapshot;
use tandem_test::{connect, trusting_config, TestServer};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn message_strategy() -> impl Strategy<Value = Message> {
    (
        MessageType::FIRST_GAME_CODE..1000u16,
        prop::collection::vec(any::<i32>(), 0..8),
        prop::collection::vec("[a-zA-Z0-9 ]{0,24}", 0..4),
        prop::collection::vec(-1.0e6f64..1.0e6, 0..4),
    )
        .prop_map(|(code, ints, strings, doubles)| {
            Message::builder(MessageType::Game(code))
                .ints(ints)
                .strings(strings)
                .doubles(doubles)
                .build()
        })
}

#[test]
fn prop_reliable_channel_preserves_order_and_content() {
    init_logger();
    let server = TestServer::start();
    let config = ClientConfig {
        datagram_enabled: false,
        ..trusting_config(&server)
    };
    let (client, session) = connect(&server, config);

    proptest!(ProptestConfig::with_cases(16), |(batch in prop::collection::vec(message_strategy(), 1..64))| {
        for message in &batch {
            client.send(message).unwrap();
        }
        for expected in &batch {
            let received = session.receive().unwrap();
            prop_assert_eq!(&received, expected);
        }
    });

    assert!(!session.controller().is_closed());
    assert_eq!(server.server().credentials().pending_count(), 0);
}

#[test]
fn snapshots_cross_intact() {
    init_logger();
    let server = TestServer::start();
    let config = ClientConfig {
        datagram_enabled: false,
        ..trusting_config(&server)
    };
    let (client, session) = connect(&server, config);

    let snapshot = GameSnapshot::new(vec![7u8; 64 * 1024]);
    let message = Message::builder(MessageType::Game(150))
        .snapshot(snapshot.clone())
        .build();
    session.send(&message).unwrap();

    let received = client.receive().unwrap();
    assert_eq!(received.snapshot(), Some(&snapshot));
}
