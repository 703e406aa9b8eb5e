use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rustls::pki_types::CertificateDer;
use tandem_shared::{
    ChannelError, HandshakeError, HybridController, HybridState, Inspection, Message,
    MessageType, SwitchRole,
};

use crate::{
    client_config::ClientConfig,
    datagram::{establish_datagram, DatagramTarget},
};

const FIND_RESEND_INTERVAL: Duration = Duration::from_millis(200);

/// Client half of the protocol switch.
///
/// Negotiates the datagram channel with the server and, when it fails later on, re-negotiates
/// it from a background thread. Any protocol violation by the server turns the switch off for
/// the rest of the session.
#[derive(Clone)]
pub struct Initiator {
    inner: Arc<Inner>,
}

struct Inner {
    server: SocketAddr,
    certificate: CertificateDer<'static>,
    config: ClientConfig,
    awaiting_response: Mutex<Option<Sender<Result<Message, HandshakeError>>>>,
    awaiting_done: Mutex<Option<Sender<()>>>,
    disabled: AtomicBool,
    recovering: AtomicBool,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
}

impl Initiator {
    pub fn new(server: SocketAddr, certificate: CertificateDer<'static>, config: ClientConfig) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                server,
                certificate,
                config,
                awaiting_response: Mutex::new(None),
                awaiting_done: Mutex::new(None),
                disabled: AtomicBool::new(false),
                recovering: AtomicBool::new(false),
                stop_tx: Mutex::new(Some(stop_tx)),
                stop_rx,
            }),
        }
    }

    /// Whether a protocol violation ended all switch attempts for this session
    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::Acquire)
    }

    pub fn is_recovering(&self) -> bool {
        self.inner.recovering.load(Ordering::Acquire)
    }

    /// Runs the full switch from `TcpOnly` to `HybridActive`.
    ///
    /// On failure the controller is back in `TcpOnly` and keeps working over the reliable
    /// channel. A [`ChannelError::HandshakeProtocol`] error disables further attempts.
    pub fn negotiate(&self, controller: &HybridController) -> Result<(), ChannelError> {
        let result = self.inner.switch(controller, false);
        if result.is_err() && !controller.is_closed() {
            controller.set_state(HybridState::TcpOnly);
        }
        result
    }

    /// Re-establishes a lost datagram channel in the background. Does nothing if a recovery
    /// is already running or the switch is disabled.
    pub fn recover(&self, controller: &HybridController) {
        if self.is_disabled() {
            controller.set_state(HybridState::TcpOnly);
            return;
        }
        if self.inner.recovering.swap(true, Ordering::AcqRel) {
            return;
        }

        let inner = self.inner.clone();
        let weak = controller.downgrade();
        let spawned = thread::Builder::new()
            .name(format!("datagram-recovery-{}", self.inner.server))
            .spawn(move || {
                inner.recovery_loop(|| weak.upgrade());
                inner.recovering.store(false, Ordering::Release);
            });

        if let Err(err) = spawned {
            warn!("Could not start datagram recovery: {}", err);
            self.inner.recovering.store(false, Ordering::Release);
            controller.set_state(HybridState::TcpOnly);
        }
    }
}

impl SwitchRole for Initiator {
    fn inspect(
        &self,
        _controller: &HybridController,
        message: &Message,
        via: &'static str,
    ) -> Inspection {
        let kind = message.kind();

        // Only a switch message out of turn breaks a pending exchange
        if kind.is_switch_control() {
            if let Some(waiter) = self.inner.awaiting_response.lock().take() {
                let answer = if kind == MessageType::ProtocolSwitchResponse {
                    Ok(message.clone())
                } else {
                    Err(HandshakeError::UnexpectedMessage {
                        expected: MessageType::ProtocolSwitchResponse,
                        received: kind,
                    })
                };
                let _ = waiter.send(answer);
                return Inspection::Consumed;
            }
        }

        match kind {
            MessageType::ProtocolSwitchDone => {
                match self.inner.awaiting_done.lock().take() {
                    Some(waiter) => {
                        let _ = waiter.send(());
                    }
                    None => debug!("Ignoring unsolicited {:?} via {}", kind, via),
                }
                Inspection::Consumed
            }
            MessageType::ProtocolSwitch
            | MessageType::ProtocolSwitchResponse
            | MessageType::ProtocolSwitchFind => {
                debug!("Ignoring unsolicited {:?} via {}", kind, via);
                Inspection::Consumed
            }
            _ => Inspection::Deliver,
        }
    }

    fn datagram_lost(&self, controller: &HybridController) {
        self.recover(controller);
    }

    fn closed(&self) {
        self.inner.stop_tx.lock().take();
        self.inner.awaiting_response.lock().take();
        self.inner.awaiting_done.lock().take();
    }
}

impl Inner {
    fn switch(&self, controller: &HybridController, recovering: bool) -> Result<(), ChannelError> {
        if self.disabled.load(Ordering::Acquire) {
            return Err(ChannelError::datagram_unavailable(
                "protocol switch disabled for this session",
            ));
        }

        let result = self.try_switch(controller, recovering);
        if let Err(err) = &result {
            self.awaiting_response.lock().take();
            self.awaiting_done.lock().take();
            controller.drop_datagram();

            if let ChannelError::HandshakeProtocol(violation) = err {
                warn!(
                    "[{}] Protocol switch aborted: {}. Staying on TCP for this session",
                    controller.label(),
                    violation
                );
                self.disabled.store(true, Ordering::Release);
            }
        }
        result
    }

    fn try_switch(&self, controller: &HybridController, recovering: bool) -> Result<(), ChannelError> {
        let channel = establish_datagram(&DatagramTarget {
            server: self.server,
            certificate: &self.certificate,
            connection: &self.config.connection,
            attempts: self.config.datagram_attempts,
            attempt_timeout: self.config.datagram_attempt_timeout,
        })?;
        let generation = controller.install_datagram(channel);

        let (response_tx, response_rx) = crossbeam_channel::bounded(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        *self.awaiting_response.lock() = Some(response_tx);
        *self.awaiting_done.lock() = Some(done_tx);

        if !recovering {
            controller.set_state(HybridState::SwitchRequested);
        }
        controller.send_reliable(&Message::new(MessageType::ProtocolSwitch))?;

        let response = match response_rx.recv_timeout(self.config.switch_timeout) {
            Ok(response) => response?,
            Err(_) => {
                return Err(ChannelError::datagram_unavailable(
                    "no protocol switch response",
                ))
            }
        };
        let find = match response.strings() {
            Some([request_id, token]) => Message::builder(MessageType::ProtocolSwitchFind)
                .strings(vec![request_id.clone(), token.clone()])
                .build(),
            _ => return Err(HandshakeError::MissingCredential.into()),
        };

        if !recovering {
            controller.set_state(HybridState::SwitchAcknowledged);
        }

        // The proof travels over a lossy channel: repeat it until the server confirms
        let deadline = Instant::now() + self.config.switch_timeout;
        loop {
            controller.send_datagram(&find)?;
            match done_rx.recv_timeout(FIND_RESEND_INTERVAL) {
                Ok(()) => break,
                Err(RecvTimeoutError::Timeout) if Instant::now() < deadline => continue,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(HandshakeError::Timeout {
                        stage: "protocol switch done",
                    }
                    .into())
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ChannelError::lost("controller closed"))
                }
            }
        }

        controller.activate_datagram(generation)
    }

    fn recovery_loop(&self, controller: impl Fn() -> Option<HybridController>) {
        let policy = &self.config.recovery;

        for attempt in 1..=policy.attempts {
            let Some(current) = controller() else {
                return;
            };
            if current.is_closed() {
                return;
            }

            info!(
                "[{}] Datagram recovery attempt {}/{}",
                current.label(),
                attempt,
                policy.attempts
            );
            match self.switch(&current, true) {
                Ok(()) => {
                    info!("[{}] Datagram channel recovered", current.label());
                    return;
                }
                Err(ChannelError::HandshakeProtocol(_)) => {
                    current.set_state(HybridState::TcpOnly);
                    return;
                }
                Err(err) => debug!("[{}] Recovery attempt failed: {}", current.label(), err),
            }
            drop(current);

            if attempt < policy.attempts {
                match self.stop_rx.recv_timeout(policy.backoff(attempt)) {
                    Err(RecvTimeoutError::Timeout) => {}
                    // Closed
                    _ => return,
                }
            }
        }

        if let Some(current) = controller() {
            warn!(
                "[{}] Datagram recovery gave up after {} attempts",
                current.label(),
                policy.attempts
            );
            current.set_state(HybridState::TcpOnly);
        }
    }
}
