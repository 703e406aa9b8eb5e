use std::{
    collections::HashMap,
    hash::Hash,
    time::{Duration, Instant},
};

/// Fixed-window rate limit: at most `limit` accepted per key in each `window`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub limit: u32,
    pub window: Duration,
}

impl ThrottleConfig {
    pub fn per_second(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Over the limit. `first_in_window` is set for the first rejection of each window, so
    /// the caller can notify the peer once instead of for every dropped message.
    Reject { first_in_window: bool },
}

struct Window {
    opened: Instant,
    accepted: u32,
    rejected: u64,
}

/// Per-key fixed-window limiter.
///
/// A window opens with the first message of a key and lasts `window`; messages beyond `limit`
/// inside it are rejected outright rather than delayed.
pub struct Throttle<K> {
    config: ThrottleConfig,
    windows: HashMap<K, Window>,
}

impl<K: Hash + Eq> Throttle<K> {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    pub fn check(&mut self, key: K, now: Instant) -> Verdict {
        let config = self.config;
        let window = self.windows.entry(key).or_insert(Window {
            opened: now,
            accepted: 0,
            rejected: 0,
        });

        if now.saturating_duration_since(window.opened) >= config.window {
            window.opened = now;
            window.accepted = 0;
            window.rejected = 0;
        }

        if window.accepted < config.limit {
            window.accepted += 1;
            Verdict::Accept
        } else {
            window.rejected += 1;
            Verdict::Reject {
                first_in_window: window.rejected == 1,
            }
        }
    }
}
