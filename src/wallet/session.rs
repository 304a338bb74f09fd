//! Wallet-wide unlock session
//!
//! Holds the password-derived master key while unlocked. Every access checks
//! the auto-lock deadline first; an expired session is torn down before the
//! caller sees `StateError::Locked`. Callers pass `now` so tests can drive the
//! clock.

use std::time::{Duration, Instant};
use zeroize::Zeroize;

use crate::crypto::SecretKeyBytes;
use crate::error::{StateError, WalletError};

pub struct Session {
    key: Option<SecretKeyBytes>,
    last_activity: Instant,
    timeout: Duration,
}

impl Session {
    pub fn new(timeout: Duration) -> Self {
        Self {
            key: None,
            last_activity: Instant::now(),
            timeout,
        }
    }

    pub fn from_minutes(minutes: u32) -> Self {
        Self::new(Duration::from_secs(u64::from(minutes) * 60))
    }

    pub fn unlock(&mut self, key: SecretKeyBytes, now: Instant) {
        self.lock();
        self.key = Some(key);
        self.last_activity = now;
    }

    /// Overwrite and drop the cached key.
    pub fn lock(&mut self) {
        if let Some(mut key) = self.key.take() {
            key.zeroize();
            log::debug!("Session locked");
        }
    }

    pub fn is_unlocked(&mut self, now: Instant) -> bool {
        self.expire_if_idle(now);
        self.key.is_some()
    }

    /// A copy of the master key, refreshing the idle timer.
    pub fn key(&mut self, now: Instant) -> Result<SecretKeyBytes, WalletError> {
        self.expire_if_idle(now);
        let key = self.key.as_ref().ok_or(StateError::Locked)?;
        self.last_activity = now;
        Ok(key.clone())
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn expire_if_idle(&mut self, now: Instant) {
        if self.key.is_some() && now.saturating_duration_since(self.last_activity) >= self.timeout {
            log::info!("🔒 Auto-lock timeout reached");
            self.lock();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.lock();
    }
}
