use tandem_shared::{ChannelError, CodecError, CryptoError, HandshakeError, MessageType};

/// Tests for the error taxonomy shared by every channel

#[test]
fn test_connection_lost_is_the_only_fatal_error() {
    assert!(ChannelError::lost("reset").is_fatal());
    assert!(!ChannelError::transport("broken pipe").is_fatal());
    assert!(!ChannelError::datagram_unavailable("closed").is_fatal());
    assert!(!ChannelError::rejected("declined").is_fatal());
    assert!(!ChannelError::from(HandshakeError::MissingCredential).is_fatal());
}

#[test]
fn test_codec_errors_are_malformed_messages() {
    let error: ChannelError = CodecError::Truncated { len: 0 }.into();
    assert_eq!(
        error,
        ChannelError::MalformedMessage(CodecError::Truncated { len: 0 })
    );
}

#[test]
fn test_crypto_errors_make_the_datagram_unavailable() {
    let error: ChannelError = CryptoError::KeyAgreementFailed.into();
    assert!(matches!(error, ChannelError::DatagramUnavailable { .. }));
}

#[test]
fn test_unexpected_message_display() {
    let error = HandshakeError::UnexpectedMessage {
        expected: MessageType::ProtocolSwitchResponse,
        received: MessageType::Game(70),
    };

    assert_eq!(
        format!("{}", error),
        "Expected ProtocolSwitchResponse during negotiation but received Game(70)"
    );
}

#[test]
fn test_error_clone() {
    let error1 = ChannelError::lost("peer closed the connection");
    let error2 = error1.clone();

    assert_eq!(error1, error2);
    assert_eq!(
        format!("{}", error2),
        "Connection lost: peer closed the connection"
    );
}
