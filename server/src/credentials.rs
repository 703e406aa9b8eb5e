use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    time::{Duration, Instant},
};

use log::debug;
use parking_lot::Mutex;
use ring::rand::{SecureRandom, SystemRandom};
use tandem_shared::{crypto::constant_time_eq, CryptoError, WeakHybridController};

/// Identifies one accepted connection for the lifetime of the server
pub type SessionId = u64;

const TOKEN_BYTES: usize = 32;

/// The one-time `(request id, token)` pair a session must present over its datagram channel
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub request_id: String,
    pub token: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

/// A credential that was successfully redeemed
pub struct Redeemed {
    pub session: SessionId,
    pub controller: WeakHybridController,
}

/// Why a presented credential was not accepted. Rejections never change the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// The request id was never issued, or was revoked
    Unknown,
    /// The request id was already redeemed
    Replayed,
    /// The request id is pending but the token does not match
    Mismatched,
    /// The credential outlived its lifetime
    Expired,
}

struct Pending {
    session: SessionId,
    token: String,
    issued: Instant,
    controller: WeakHybridController,
}

#[derive(Default)]
struct Registry {
    pending: HashMap<String, Pending>,
    by_session: HashMap<SessionId, String>,
    consumed: HashSet<String>,
    consumed_order: VecDeque<String>,
}

/// Issues and redeems protocol-switch credentials.
///
/// Each session holds at most one pending credential; issuing a new one revokes the old.
/// A credential is good for a single redemption within its lifetime.
pub struct CredentialRegistry {
    lifetime: Duration,
    consumed_capacity: usize,
    rng: SystemRandom,
    registry: Mutex<Registry>,
}

impl CredentialRegistry {
    pub fn new(lifetime: Duration, consumed_capacity: usize) -> Self {
        Self {
            lifetime,
            consumed_capacity,
            rng: SystemRandom::new(),
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn issue(
        &self,
        session: SessionId,
        controller: WeakHybridController,
    ) -> Result<Credential, CryptoError> {
        self.issue_at(session, controller, Instant::now())
    }

    pub fn redeem(&self, request_id: &str, token: &str) -> Result<Redeemed, Rejection> {
        self.redeem_at(request_id, token, Instant::now())
    }

    /// Forgets the session's pending credential, if any
    pub fn revoke_session(&self, session: SessionId) {
        let mut registry = self.registry.lock();
        if let Some(request_id) = registry.by_session.remove(&session) {
            registry.pending.remove(&request_id);
            debug!("Revoked credential {} of session {}", request_id, session);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.registry.lock().pending.len()
    }

    fn issue_at(
        &self,
        session: SessionId,
        controller: WeakHybridController,
        now: Instant,
    ) -> Result<Credential, CryptoError> {
        let mut secret = [0u8; TOKEN_BYTES];
        self.rng
            .fill(&mut secret)
            .map_err(|_| CryptoError::RandomFailed)?;
        let token = base64::encode_config(secret, base64::URL_SAFE_NO_PAD);

        let mut registry = self.registry.lock();
        registry.expire(now, self.lifetime);

        let request_id = loop {
            let candidate = format!("{:016x}", fastrand::u64(..));
            if !registry.pending.contains_key(&candidate) && !registry.consumed.contains(&candidate)
            {
                break candidate;
            }
        };

        if let Some(previous) = registry.by_session.insert(session, request_id.clone()) {
            registry.pending.remove(&previous);
        }
        registry.pending.insert(
            request_id.clone(),
            Pending {
                session,
                token: token.clone(),
                issued: now,
                controller,
            },
        );

        Ok(Credential { request_id, token })
    }

    fn redeem_at(&self, request_id: &str, token: &str, now: Instant) -> Result<Redeemed, Rejection> {
        let mut registry = self.registry.lock();

        let Some(pending) = registry.pending.get(request_id) else {
            return Err(if registry.consumed.contains(request_id) {
                Rejection::Replayed
            } else {
                Rejection::Unknown
            });
        };

        if !constant_time_eq(pending.token.as_bytes(), token.as_bytes()) {
            return Err(Rejection::Mismatched);
        }
        if now.saturating_duration_since(pending.issued) > self.lifetime {
            return Err(Rejection::Expired);
        }

        let Some(pending) = registry.pending.remove(request_id) else {
            return Err(Rejection::Unknown);
        };
        registry.by_session.remove(&pending.session);
        registry.remember_consumed(request_id.to_string(), self.consumed_capacity);

        Ok(Redeemed {
            session: pending.session,
            controller: pending.controller,
        })
    }
}

impl Registry {
    fn expire(&mut self, now: Instant, lifetime: Duration) {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, pending)| now.saturating_duration_since(pending.issued) > lifetime)
            .map(|(request_id, _)| request_id.clone())
            .collect();

        for request_id in expired {
            if let Some(pending) = self.pending.remove(&request_id) {
                self.by_session.remove(&pending.session);
            }
        }
    }

    fn remember_consumed(&mut self, request_id: String, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.consumed_order.len() >= capacity {
            if let Some(oldest) = self.consumed_order.pop_front() {
                self.consumed.remove(&oldest);
            }
        }
        self.consumed.insert(request_id.clone());
        self.consumed_order.push_back(request_id);
    }
}
