//! Reconnect policy for the push channel.
//!
//! Pure state machine, no I/O: the channel task asks it what to do after
//! every disconnect and tells it when a connection opened.

use std::time::Duration;

use crate::config::SyncConfig;

/// What the channel should do after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    After(Duration),
    /// Attempts exhausted; the channel must stop and enter `Failed`.
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            attempt: 0,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.backoff_base,
            config.backoff_cap,
            config.max_reconnect_attempts,
        )
    }

    /// `min(base * 2^attempt, cap)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// A connection opened and authenticated; start counting from zero again.
    pub fn on_open(&mut self) {
        self.attempt = 0;
    }

    pub fn on_disconnect(&mut self) -> Reconnect {
        if self.attempt >= self.max_attempts {
            return Reconnect::GiveUp;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Reconnect::After(delay)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
