//! Tuning constants for handshakes, replay and registry sweeps
//!
//! All values are in milliseconds. A JSON override document only needs the
//! keys it changes:
//!
//! ```
//! use parley_protocol::Tuning;
//! use std::time::Duration;
//!
//! let tuning = Tuning::from_json_str(r#"{ "max_handshake_attempts": 3 }"#).unwrap();
//! assert_eq!(tuning.max_handshake_attempts, 3);
//! assert_eq!(tuning.retry_interval(), Duration::from_millis(500));
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Offers the host sends before giving up
    pub max_handshake_attempts: u32,

    /// Delay between two host offers
    pub handshake_retry_interval_ms: u64,

    /// Delay after which the host starts offering even without a load signal
    pub load_fallback_ms: u64,

    /// How long a child waits for an offer
    pub handshake_timeout_ms: u64,

    /// Delay between child establishment and replay of queued messages
    pub replay_delay_ms: u64,

    /// Interval of the registry sweep
    pub sweep_interval_ms: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            max_handshake_attempts: 10,
            handshake_retry_interval_ms: 500,
            load_fallback_ms: 1_000,
            handshake_timeout_ms: 10_000,
            replay_delay_ms: 50,
            sweep_interval_ms: 30_000,
        }
    }
}

impl Tuning {
    /// Parses an override document; missing keys keep their defaults
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let tuning: Tuning =
            serde_json::from_str(document).map_err(|e| ConfigError::Parse(e.to_string()))?;
        tuning.validate()?;
        Ok(tuning)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_handshake_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_handshake_attempts must be at least 1".to_string(),
            ));
        }
        if self.handshake_retry_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "handshake_retry_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("sweep_interval_ms must be non-zero".to_string()));
        }
        Ok(())
    }

    #[inline]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_retry_interval_ms)
    }

    #[inline]
    pub fn load_fallback(&self) -> Duration {
        Duration::from_millis(self.load_fallback_ms)
    }

    #[inline]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    #[inline]
    pub fn replay_delay(&self) -> Duration {
        Duration::from_millis(self.replay_delay_ms)
    }

    #[inline]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
