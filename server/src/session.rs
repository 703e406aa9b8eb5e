use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tandem_shared::{ChannelError, Delivery, HybridController, HybridState, Message, MessageChannel};

use crate::credentials::SessionId;

/// Messages a session let through to the consumer and messages it dropped
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub forwarded: u64,
    pub throttled: u64,
}

/// Live counters behind [`SessionStats`], bumped on the controller's pump threads
#[derive(Default)]
pub(crate) struct SessionCounters {
    forwarded: AtomicU64,
    throttled: AtomicU64,
}

impl SessionCounters {
    pub fn forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
        }
    }
}

/// One connected client, as handed out by [`Server::accept`](crate::Server::accept).
///
/// Wraps the session's [`HybridController`]. Rate limiting happens as messages arrive, in
/// the session's [`Responder`](crate::Responder): messages over the limit never reach the
/// inbound queue, however slowly the consumer reads it.
pub struct Session {
    id: SessionId,
    controller: HybridController,
    counters: Arc<SessionCounters>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        controller: HybridController,
        counters: Arc<SessionCounters>,
    ) -> Self {
        Self {
            id,
            controller,
            counters,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.controller.reliable().peer_addr()
    }

    pub fn state(&self) -> HybridState {
        self.controller.state()
    }

    pub fn controller(&self) -> &HybridController {
        &self.controller
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Blocks for the next message that passed the throttle, with the transport it came on
    pub fn receive_delivery(&self) -> Result<Delivery, ChannelError> {
        self.controller.receive_delivery()
    }
}

impl MessageChannel for Session {
    fn send(&self, message: &Message) -> Result<(), ChannelError> {
        self.controller.send(message)
    }

    fn receive(&self) -> Result<Message, ChannelError> {
        self.receive_delivery().map(|delivery| delivery.message)
    }

    fn close(&self) {
        self.controller.close();
    }

    fn protocol_name(&self) -> &'static str {
        self.controller.protocol_name()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.controller.close();
    }
}
