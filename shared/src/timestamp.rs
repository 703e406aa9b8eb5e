use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("system clock is {0:?} before the UNIX epoch")]
    BeforeEpoch(Duration),
}

/// Wall-clock stamps for datagram envelopes
pub struct Timestamp;

impl Timestamp {
    /// Milliseconds since the UNIX epoch
    pub fn try_now_millis() -> Result<u64, TimeError> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| TimeError::BeforeEpoch(err.duration()))?;
        Ok(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }

    /// Stamp for an outgoing envelope, 0 when the clock is set before 1970.
    /// Receivers order by sequence number and never by stamp.
    pub fn envelope_stamp() -> u64 {
        Self::try_now_millis().unwrap_or(0)
    }
}
