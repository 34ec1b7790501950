//! Configuration for the offline engine.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the cache, queue and sync controller.
///
/// Durations are serialized as whole milliseconds so configs can be kept in
/// JSON files next to the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on the cache's total size in bytes.
    pub max_total_bytes: u64,
    /// Attempts an action gets before it is dead-lettered.
    pub max_attempts: u32,
    /// Backoff delay after the first retryable failure.
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
    /// Upper bound on the backoff delay.
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    /// TTL applied to cache writes that don't specify one.
    #[serde(rename = "default_ttl_ms", with = "opt_millis")]
    pub default_ttl: Option<Duration>,
    /// Periodic sync interval while online.
    #[serde(rename = "sync_interval_ms", with = "millis")]
    pub sync_interval: Duration,
    /// Actions fetched per `peek_batch` during replay.
    pub batch_size: usize,
    /// Deadline for a single action execution.
    #[serde(rename = "action_timeout_ms", with = "millis")]
    pub action_timeout: Duration,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the JSON is malformed or fails validation.
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the cache size budget.
    pub fn with_max_total_bytes(mut self, bytes: u64) -> Self {
        self.max_total_bytes = bytes;
        self
    }

    /// Sets the retry budget per action.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base backoff delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum backoff delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the default cache TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Cache writes without an explicit TTL never expire.
    pub fn with_no_default_ttl(mut self) -> Self {
        self.default_ttl = None;
        self
    }

    /// Sets the periodic sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the replay batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the per-action execution timeout.
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Checks the configuration for inconsistent values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_attempts == 0 {
            return Err(EngineError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(EngineError::InvalidConfig(
                "batch_size must be at least 1".into(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(EngineError::InvalidConfig(format!(
                "base_delay ({:?}) exceeds max_delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }
        if self.sync_interval.is_zero() {
            return Err(EngineError::InvalidConfig(
                "sync_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Backoff before the next cycle after an action that had already failed
    /// `prior_failures` times fails again: `min(base * 2^n, max)`.
    pub fn delay_for_attempts(&self, prior_failures: u32) -> Duration {
        let factor = 2u32.checked_pow(prior_failures).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_total_bytes: 50 * 1024 * 1024,
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            default_ttl: Some(Duration::from_secs(24 * 60 * 60)),
            sync_interval: Duration::from_secs(30),
            batch_size: 50,
            action_timeout: Duration::from_secs(30),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(crate::clock::duration_millis(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&crate::clock::duration_millis(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
