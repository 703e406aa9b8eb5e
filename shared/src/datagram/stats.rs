use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time counters of one datagram channel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DatagramStats {
    pub sent: u64,
    pub accepted: u64,
    pub dropped_replay: u64,
    pub dropped_auth: u64,
    pub dropped_malformed: u64,
    /// Highest of our sequence numbers the peer has reported receiving
    pub peer_acknowledged: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub sent: AtomicU64,
    pub accepted: AtomicU64,
    pub dropped_replay: AtomicU64,
    pub dropped_auth: AtomicU64,
    pub dropped_malformed: AtomicU64,
    pub peer_acknowledged: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DatagramStats {
        DatagramStats {
            sent: self.sent.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped_replay: self.dropped_replay.load(Ordering::Relaxed),
            dropped_auth: self.dropped_auth.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            peer_acknowledged: self.peer_acknowledged.load(Ordering::Relaxed),
        }
    }
}
