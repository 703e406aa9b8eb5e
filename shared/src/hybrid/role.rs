use super::HybridController;
use crate::message::Message;

/// What the controller does with an inbound message after the role has seen it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inspection {
    /// The role handled it; the consumer never sees it
    Consumed,
    /// Queue it for the consumer
    Deliver,
}

/// The side-specific half of the protocol switch: the client initiates, the server responds.
///
/// Hooks run on the controller's pump threads and must not block for long.
pub trait SwitchRole: Send + Sync {
    /// Sees every inbound message before the consumer does. `via` is the protocol name of the
    /// channel that carried it.
    fn inspect(&self, controller: &HybridController, message: &Message, via: &'static str)
        -> Inspection;

    /// The active datagram channel stopped. The controller already routes everything over
    /// the reliable channel and is in `Recovering`.
    fn datagram_lost(&self, controller: &HybridController) {
        let _ = controller;
    }

    /// The controller was closed
    fn closed(&self) {}
}

/// A role that never negotiates and delivers everything
pub struct Passive;

impl SwitchRole for Passive {
    fn inspect(&self, _: &HybridController, _: &Message, _: &'static str) -> Inspection {
        Inspection::Deliver
    }

    fn datagram_lost(&self, controller: &HybridController) {
        controller.set_state(super::HybridState::TcpOnly);
    }
}
