use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use super::{HybridState, Inspection, RoutingPolicy, SwitchRole};
use crate::{
    channel::{MessageChannel, PROTOCOL_HYBRID, PROTOCOL_TCP, PROTOCOL_UDP},
    datagram::DatagramChannel,
    error::ChannelError,
    message::Message,
    reliable::ReliableChannel,
};

/// A message together with the transport that carried it
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub message: Message,
    pub protocol: &'static str,
}

enum Inbound {
    Delivery(Delivery),
    Lost(String),
}

struct Slot {
    channel: Option<Arc<DatagramChannel>>,
    generation: u64,
}

struct Inner {
    label: String,
    reliable: Arc<ReliableChannel>,
    datagram: Mutex<Slot>,
    state: Mutex<HybridState>,
    state_changed: Condvar,
    inbound_tx: Sender<Inbound>,
    inbound_rx: Receiver<Inbound>,
    receive_lock: Mutex<()>,
    lost: Mutex<Option<String>>,
    closed: AtomicBool,
    role: Arc<dyn SwitchRole>,
    routing: RoutingPolicy,
    reliable_sent: AtomicU64,
    datagram_sent: AtomicU64,
}

/// One session's transports behind a single [`MessageChannel`].
///
/// Owns the reliable channel and at most one datagram channel. Critical messages, and every
/// message outside `HybridActive`, travel over the reliable channel; droppable ones try the
/// datagram channel first. Inbound traffic from both is merged into one queue. The side
/// specific protocol-switch logic lives in the [`SwitchRole`].
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct HybridController {
    inner: Arc<Inner>,
}

/// Non-owning handle, for registries and background tasks
#[derive(Clone)]
pub struct WeakHybridController {
    inner: Weak<Inner>,
}

impl WeakHybridController {
    pub fn upgrade(&self) -> Option<HybridController> {
        self.inner.upgrade().map(|inner| HybridController { inner })
    }
}

impl Default for WeakHybridController {
    /// A handle that never upgrades
    fn default() -> Self {
        Self { inner: Weak::new() }
    }
}

impl HybridController {
    /// Takes over `reliable` and starts pumping its inbound messages
    pub fn new(
        reliable: ReliableChannel,
        role: Arc<dyn SwitchRole>,
        routing: RoutingPolicy,
    ) -> Result<Self, ChannelError> {
        let label = reliable.peer_addr().to_string();
        let reliable = Arc::new(reliable);
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();

        let controller = Self {
            inner: Arc::new(Inner {
                label,
                reliable: reliable.clone(),
                datagram: Mutex::new(Slot {
                    channel: None,
                    generation: 0,
                }),
                state: Mutex::new(HybridState::TcpOnly),
                state_changed: Condvar::new(),
                inbound_tx,
                inbound_rx,
                receive_lock: Mutex::new(()),
                lost: Mutex::new(None),
                closed: AtomicBool::new(false),
                role,
                routing,
                reliable_sent: AtomicU64::new(0),
                datagram_sent: AtomicU64::new(0),
            }),
        };

        let weak = controller.downgrade();
        thread::Builder::new()
            .name(format!("hybrid-tcp-{}", controller.inner.label))
            .spawn(move || reliable_pump(reliable, weak))
            .map_err(|err| ChannelError::transport(err.to_string()))?;

        Ok(controller)
    }

    pub fn downgrade(&self) -> WeakHybridController {
        WeakHybridController {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Peer address of the reliable channel, used to label log lines
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn reliable(&self) -> &ReliableChannel {
        &self.inner.reliable
    }

    pub fn routing(&self) -> &RoutingPolicy {
        &self.inner.routing
    }

    pub fn state(&self) -> HybridState {
        *self.inner.state.lock()
    }

    pub fn set_state(&self, next: HybridState) {
        let mut state = self.inner.state.lock();
        if *state != next {
            info!("[{}] {} -> {}", self.inner.label, *state, next);
            *state = next;
            self.inner.state_changed.notify_all();
        }
    }

    /// Blocks until the controller is in `target`. Returns `false` on timeout or close.
    pub fn wait_for_state(&self, target: HybridState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while *state != target {
            if self.is_closed() {
                return false;
            }
            if self
                .inner
                .state_changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return *state == target;
            }
        }
        true
    }

    /// Replaces the datagram channel, closing any previous one. The new channel carries
    /// nothing until [`activate_datagram`](Self::activate_datagram). Returns its generation.
    pub fn install_datagram(&self, channel: DatagramChannel) -> u64 {
        let mut slot = self.inner.datagram.lock();
        if let Some(stale) = slot.channel.take() {
            stale.close();
        }
        slot.generation += 1;
        slot.channel = Some(Arc::new(channel));
        debug!(
            "[{}] Installed datagram channel generation {}",
            self.inner.label, slot.generation
        );
        slot.generation
    }

    /// Starts the installed channel of `generation`, pumps its inbound messages and enters
    /// `HybridActive`
    pub fn activate_datagram(&self, generation: u64) -> Result<(), ChannelError> {
        let channel = {
            let slot = self.inner.datagram.lock();
            match &slot.channel {
                Some(channel) if slot.generation == generation => channel.clone(),
                _ => {
                    return Err(ChannelError::datagram_unavailable(
                        "datagram channel was replaced",
                    ))
                }
            }
        };

        channel.start()?;

        let weak = self.downgrade();
        let pumped = channel.clone();
        thread::Builder::new()
            .name(format!("hybrid-udp-{}", self.inner.label))
            .spawn(move || datagram_pump(pumped, generation, weak))
            .map_err(|err| ChannelError::datagram_unavailable(err.to_string()))?;

        self.set_state(HybridState::HybridActive);
        Ok(())
    }

    /// Closes and forgets the datagram channel, if any
    pub fn drop_datagram(&self) {
        let mut slot = self.inner.datagram.lock();
        if let Some(channel) = slot.channel.take() {
            slot.generation += 1;
            channel.close();
        }
    }

    pub fn datagram(&self) -> Option<Arc<DatagramChannel>> {
        self.inner.datagram.lock().channel.clone()
    }

    pub fn datagram_generation(&self) -> u64 {
        self.inner.datagram.lock().generation
    }

    /// Sends over the reliable channel regardless of state or routing
    pub fn send_reliable(&self, message: &Message) -> Result<(), ChannelError> {
        self.inner.reliable.send(message)?;
        self.inner.reliable_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Sends over the installed datagram channel, active or not
    pub fn send_datagram(&self, message: &Message) -> Result<(), ChannelError> {
        let channel = self
            .datagram()
            .ok_or_else(|| ChannelError::datagram_unavailable("no datagram channel"))?;
        channel.send(message)?;
        self.inner.datagram_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Messages sent so far over the (reliable, datagram) channel
    pub fn sent_counts(&self) -> (u64, u64) {
        (
            self.inner.reliable_sent.load(Ordering::Relaxed),
            self.inner.datagram_sent.load(Ordering::Relaxed),
        )
    }

    /// Like `receive()`, also naming the channel the message arrived on
    pub fn receive_delivery(&self) -> Result<Delivery, ChannelError> {
        let _receiving = self.inner.receive_lock.lock();

        if let Some(reason) = self.inner.lost.lock().clone() {
            return Err(ChannelError::lost(reason));
        }

        match self.inner.inbound_rx.recv() {
            Ok(Inbound::Delivery(delivery)) => Ok(delivery),
            Ok(Inbound::Lost(reason)) => {
                *self.inner.lost.lock() = Some(reason.clone());
                self.close();
                Err(ChannelError::lost(reason))
            }
            Err(_) => Err(ChannelError::lost("controller dropped")),
        }
    }

    /// Queues a message for the consumer as if it had arrived on `protocol`
    pub fn deliver(&self, message: Message, protocol: &'static str) {
        let _ = self
            .inner
            .inbound_tx
            .send(Inbound::Delivery(Delivery { message, protocol }));
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn dispatch(&self, message: Message, via: &'static str) {
        match self.inner.role.inspect(self, &message, via) {
            Inspection::Consumed => {}
            Inspection::Deliver => self.deliver(message, via),
        }
    }

    fn datagram_lost(&self, generation: u64) {
        {
            let mut slot = self.inner.datagram.lock();
            if slot.generation != generation || self.is_closed() {
                return;
            }
            if let Some(channel) = slot.channel.take() {
                channel.close();
            }
        }

        warn!(
            "[{}] Datagram channel lost, routing everything over the reliable channel",
            self.inner.label
        );
        self.set_state(HybridState::Recovering);
        self.inner.role.datagram_lost(self);
    }

    fn reliable_lost(&self, reason: String) {
        // Queued ahead of close()'s own sentinel so the consumer sees the real cause
        let _ = self.inner.inbound_tx.send(Inbound::Lost(reason));
        self.inner.close();
    }
}

impl MessageChannel for HybridController {
    fn send(&self, message: &Message) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::lost("controller closed"));
        }

        if self.state().routes_datagrams() && !self.inner.routing.is_critical(message.kind()) {
            match self.send_datagram(message) {
                Ok(()) => return Ok(()),
                Err(err) => debug!(
                    "[{}] Datagram send failed, using reliable channel: {}",
                    self.inner.label, err
                ),
            }
        }

        self.send_reliable(message)
    }

    fn receive(&self) -> Result<Message, ChannelError> {
        self.receive_delivery().map(|delivery| delivery.message)
    }

    fn close(&self) {
        self.inner.close();
    }

    fn protocol_name(&self) -> &'static str {
        if self.state().routes_datagrams() {
            PROTOCOL_HYBRID
        } else {
            PROTOCOL_TCP
        }
    }
}

impl Inner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("[{}] Closing session", self.label);

        self.reliable.close();
        {
            let mut slot = self.datagram.lock();
            if let Some(channel) = slot.channel.take() {
                slot.generation += 1;
                channel.close();
            }
        }
        self.role.closed();

        let _ = self
            .inbound_tx
            .send(Inbound::Lost("controller closed".to_string()));
        // Wake anyone parked in wait_for_state
        let _state = self.state.lock();
        self.state_changed.notify_all();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

fn reliable_pump(reliable: Arc<ReliableChannel>, controller: WeakHybridController) {
    loop {
        let received = reliable.receive();
        let Some(controller) = controller.upgrade() else {
            reliable.close();
            return;
        };

        match received {
            Ok(message) => controller.dispatch(message, PROTOCOL_TCP),
            Err(err) => {
                controller.reliable_lost(err.to_string());
                return;
            }
        }
    }
}

fn datagram_pump(
    channel: Arc<DatagramChannel>,
    generation: u64,
    controller: WeakHybridController,
) {
    loop {
        let received = channel.receive();
        let Some(controller) = controller.upgrade() else {
            channel.close();
            return;
        };

        match received {
            Ok(message) => controller.dispatch(message, PROTOCOL_UDP),
            Err(err) => {
                debug!("[{}] Datagram pump stopped: {}", controller.label(), err);
                controller.datagram_lost(generation);
                return;
            }
        }
    }
}
