//! Sync client configuration.
//!
//! `SyncConfig` carries every tunable of the sync client. All fields default,
//! so an empty JSON object is a valid configuration.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY_MS: u64 = 5_000;
const DEFAULT_JITTER_MS: u64 = 1_000;
const DEFAULT_CONFLICT_WINDOW_MS: i64 = 30_000;
const DEFAULT_CONFLICT_SWEEP_SECS: u64 = 5 * 60;
const DEFAULT_HEARTBEAT_SECS: u64 = 30;
const DEFAULT_CONFLICT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid sync configuration: {0}")]
    Invalid(String),
    #[error("Failed to parse sync configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Reconnect/backoff policy for the hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default, rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// Retries after a drop before giving up
    pub max_attempts: u32,
    /// Delay of the first retry; doubled per attempt
    pub base_delay_ms: u64,
    /// Upper bound (exclusive) of the random delay added to each retry
    pub jitter_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            jitter_ms: DEFAULT_JITTER_MS,
        }
    }
}

impl ReconnectPolicy {
    /// Deterministic part of the delay for the 0-indexed `attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Full delay for `attempt`: `base_delay_ms * 2^attempt + random(0, jitter_ms)`.
    pub fn delay_for_attempt(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..self.jitter_ms)
        };
        self.base_delay(attempt)
            .saturating_add(Duration::from_millis(jitter))
    }

    /// Whether `attempts` retries have used up the policy.
    pub const fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Tunables for the sync client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default, rename_all = "camelCase")]
pub struct SyncConfig {
    pub reconnect: ReconnectPolicy,
    /// Two updates closer than this are treated as conflicting
    pub conflict_window_ms: i64,
    /// Period of the unresolved-conflict sweep
    pub conflict_sweep_interval_secs: u64,
    /// Period of the "active" presence heartbeat
    pub heartbeat_interval_secs: u64,
    /// Resolved conflicts kept for inspection
    pub conflict_history_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            conflict_window_ms: DEFAULT_CONFLICT_WINDOW_MS,
            conflict_sweep_interval_secs: DEFAULT_CONFLICT_SWEEP_SECS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_SECS,
            conflict_history_limit: DEFAULT_CONFLICT_HISTORY_LIMIT,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON configuration payload.
    pub fn parse(payload: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(payload)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect.base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect.baseDelayMs must be > 0".to_string(),
            ));
        }
        if self.conflict_window_ms < 0 {
            return Err(ConfigError::Invalid(
                "conflictWindowMs must not be negative".to_string(),
            ));
        }
        if self.conflict_sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "conflictSweepIntervalSecs must be > 0".to_string(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeatIntervalSecs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub const fn conflict_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.conflict_sweep_interval_secs)
    }

    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}
