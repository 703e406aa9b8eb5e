use std::{sync::Arc, time::Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;
use tandem_shared::{
    HybridController, HybridState, Inspection, Message, MessageChannel, MessageType, SwitchRole,
    Throttle, ThrottleConfig, Verdict, PROTOCOL_TCP,
};

use crate::{
    credentials::{CredentialRegistry, SessionId},
    session::SessionCounters,
};

/// Server half of the protocol switch.
///
/// Answers each `PROTOCOL_SWITCH` with a fresh credential. Binding the datagram channel and
/// sending `PROTOCOL_SWITCH_DONE` happen in the [`DatagramEndpoint`](crate::DatagramEndpoint)
/// once the credential comes back over UDP. Recovery is driven by the client, so a lost
/// datagram channel simply drops the session back to `TcpOnly`.
///
/// With a throttle, inbound game messages are also rate-limited per message type here, as
/// they arrive. Messages over the limit are dropped before they are queued, and the first
/// drop of each window tells the client with a `MESSAGE_TOO_FREQUENT` carrying the type code.
pub struct Responder {
    session: SessionId,
    credentials: Option<Arc<CredentialRegistry>>,
    throttle: Option<Mutex<Throttle<MessageType>>>,
    counters: Arc<SessionCounters>,
}

impl Responder {
    /// `credentials` is `None` when the server has no datagram endpoint
    pub fn new(session: SessionId, credentials: Option<Arc<CredentialRegistry>>) -> Self {
        Self {
            session,
            credentials,
            throttle: None,
            counters: Arc::default(),
        }
    }

    pub fn with_throttle(mut self, throttle: Option<ThrottleConfig>) -> Self {
        self.throttle = throttle.map(|config| Mutex::new(Throttle::new(config)));
        self
    }

    pub(crate) fn counters(&self) -> Arc<SessionCounters> {
        self.counters.clone()
    }

    fn admit(&self, controller: &HybridController, kind: MessageType, now: Instant) -> bool {
        let Some(throttle) = &self.throttle else {
            return true;
        };
        if kind.is_control() {
            return true;
        }

        let verdict = throttle.lock().check(kind, now);
        match verdict {
            Verdict::Accept => true,
            Verdict::Reject { first_in_window } => {
                self.counters.throttled();
                if first_in_window {
                    info!(
                        "[{}] Throttling {:?} from session {}",
                        controller.label(),
                        kind,
                        self.session
                    );
                    let notice = Message::builder(MessageType::MessageTooFrequent)
                        .ints(vec![i32::from(kind.code())])
                        .build();
                    if let Err(err) = controller.send(&notice) {
                        debug!("[{}] Could not send throttle notice: {}", controller.label(), err);
                    }
                }
                false
            }
        }
    }

    fn answer_switch(&self, controller: &HybridController) {
        let Some(credentials) = &self.credentials else {
            debug!(
                "[{}] Ignoring protocol switch request, datagram transport is disabled",
                controller.label()
            );
            return;
        };

        let credential = match credentials.issue(self.session, controller.downgrade()) {
            Ok(credential) => credential,
            Err(err) => {
                warn!("[{}] Could not issue credential: {}", controller.label(), err);
                return;
            }
        };

        let response = Message::builder(MessageType::ProtocolSwitchResponse)
            .strings(vec![credential.request_id.clone(), credential.token])
            .build();
        match controller.send_reliable(&response) {
            Ok(()) => info!(
                "[{}] Issued protocol switch credential {}",
                controller.label(),
                credential.request_id
            ),
            Err(err) => {
                debug!(
                    "[{}] Could not send protocol switch response: {}",
                    controller.label(),
                    err
                );
                credentials.revoke_session(self.session);
            }
        }
    }
}

impl SwitchRole for Responder {
    fn inspect(
        &self,
        controller: &HybridController,
        message: &Message,
        via: &'static str,
    ) -> Inspection {
        match message.kind() {
            MessageType::ProtocolSwitch if via == PROTOCOL_TCP => {
                self.answer_switch(controller);
                Inspection::Consumed
            }
            // Repeats of the proof that arrive after the channel was bound
            MessageType::ProtocolSwitchFind => {
                debug!("[{}] Ignoring repeated switch proof via {}", controller.label(), via);
                Inspection::Consumed
            }
            kind if kind.is_switch_control() => {
                debug!("[{}] Ignoring unsolicited {:?} via {}", controller.label(), kind, via);
                Inspection::Consumed
            }
            kind if self.admit(controller, kind, Instant::now()) => {
                self.counters.forwarded();
                Inspection::Deliver
            }
            _ => Inspection::Consumed,
        }
    }

    fn datagram_lost(&self, controller: &HybridController) {
        controller.set_state(HybridState::TcpOnly);
    }

    fn closed(&self) {
        if let Some(credentials) = &self.credentials {
            credentials.revoke_session(self.session);
        }
    }
}
