use std::fmt;

/// Where a [`HybridController`](super::HybridController) stands in the protocol switch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HybridState {
    /// Reliable channel only; initial state and the permanent fallback
    TcpOnly,
    /// `PROTOCOL_SWITCH` sent, awaiting the credential
    SwitchRequested,
    /// Credential received, proof sent over the datagram channel
    SwitchAcknowledged,
    /// Both channels carry traffic
    HybridActive,
    /// The datagram channel failed; a replacement is being negotiated
    Recovering,
}

impl HybridState {
    /// Whether non-critical traffic may use the datagram channel
    pub fn routes_datagrams(&self) -> bool {
        matches!(self, HybridState::HybridActive)
    }
}

impl fmt::Display for HybridState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HybridState::TcpOnly => "TCP_ONLY",
            HybridState::SwitchRequested => "SWITCH_REQUESTED",
            HybridState::SwitchAcknowledged => "SWITCH_ACKNOWLEDGED",
            HybridState::HybridActive => "HYBRID_ACTIVE",
            HybridState::Recovering => "RECOVERING",
        };
        f.write_str(name)
    }
}
