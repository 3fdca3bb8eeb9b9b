use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::constants::FALLBACK_TOKEN_LIFETIME_MINUTES;

/// Advisory token freshness check.
///
/// The provider stays the authority on stale tokens; this only saves a round
/// trip when the cached expiry has already passed. When no expiry is known the
/// guard falls back to the last expiry it has seen, or else treats the token
/// as valid for another hour. That fallback is lenient on purpose and is not a
/// security boundary.
///
/// Concurrent requests may race on the recorded expiry. A lost update only
/// moves the leniency window.
#[derive(Debug, Default)]
pub struct ExpiryGuard {
    last_known: Mutex<Option<DateTime<Utc>>>,
}

impl ExpiryGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember an expiry read from the token cache.
    pub fn record(&self, expires_at: DateTime<Utc>) {
        *self.last_known.lock() = Some(expires_at);
    }

    pub fn last_known(&self) -> Option<DateTime<Utc>> {
        *self.last_known.lock()
    }

    pub fn is_expired(&self, expires_at: Option<DateTime<Utc>>) -> bool {
        self.is_expired_at(expires_at, Utc::now())
    }

    pub fn is_expired_at(&self, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let effective = expires_at
            .or_else(|| self.last_known())
            .unwrap_or_else(|| now + Duration::minutes(FALLBACK_TOKEN_LIFETIME_MINUTES));

        now >= effective
    }
}
