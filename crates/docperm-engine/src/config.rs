//! Engine configuration.
//!
//! Supports configuration via environment variables:
//!
//! ```bash
//! DOCPERM_LOCK_TIMEOUT_MS=5000               # wait for a workspace write lock
//! DOCPERM_PROPAGATION_INLINE_BUDGET=1000     # fan-out jobs run before deferring
//! DOCPERM_PROPAGATION_MAX_DEPTH=64           # document nesting cap for fan-out
//! DOCPERM_GUEST_EXPIRE_DAYS=30               # default guest invite lifetime
//! DOCPERM_GUEST_SWEEP_INTERVAL_SECS=3600     # guest sweeper period
//! ```

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const LOCK_TIMEOUT_VAR: &str = "DOCPERM_LOCK_TIMEOUT_MS";
pub const INLINE_BUDGET_VAR: &str = "DOCPERM_PROPAGATION_INLINE_BUDGET";
pub const MAX_DEPTH_VAR: &str = "DOCPERM_PROPAGATION_MAX_DEPTH";
pub const GUEST_EXPIRE_DAYS_VAR: &str = "DOCPERM_GUEST_EXPIRE_DAYS";
pub const GUEST_SWEEP_INTERVAL_VAR: &str = "DOCPERM_GUEST_SWEEP_INTERVAL_SECS";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Longest wait for a workspace write lock before failing with `Conflict`
    pub lock_timeout: Duration,
    /// Fan-out jobs processed inside the caller; the rest run in the background
    pub inline_budget: usize,
    /// Document nesting depth beyond which fan-out stops
    pub max_depth: usize,
    /// Lifetime of a guest invite when the caller gives none
    pub guest_expire_days: u32,
    /// Period of the background guest sweep
    pub guest_sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(5000),
            inline_budget: 1000,
            max_depth: 64,
            guest_expire_days: 30,
            guest_sweep_interval: Duration::from_secs(3600),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}' (expected {expected})")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

fn parse_var<T: FromStr>(var: &'static str, default: T, expected: &'static str) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var,
            value,
            expected,
        }),
        Err(_) => Ok(default),
    }
}

fn positive(var: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            expected: "a positive integer",
        });
    }
    Ok(value)
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let lock_timeout_ms = positive(
            LOCK_TIMEOUT_VAR,
            parse_var(LOCK_TIMEOUT_VAR, 5000u64, "milliseconds")?,
        )?;
        let inline_budget = parse_var(
            INLINE_BUDGET_VAR,
            defaults.inline_budget,
            "a non-negative integer",
        )?;
        let max_depth = parse_var(MAX_DEPTH_VAR, defaults.max_depth, "a non-negative integer")?;
        let guest_expire_days = positive(
            GUEST_EXPIRE_DAYS_VAR,
            parse_var(GUEST_EXPIRE_DAYS_VAR, 30u64, "days")?,
        )?;
        let sweep_secs = positive(
            GUEST_SWEEP_INTERVAL_VAR,
            parse_var(GUEST_SWEEP_INTERVAL_VAR, 3600u64, "seconds")?,
        )?;

        Ok(Self {
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            inline_budget,
            max_depth,
            guest_expire_days: u32::try_from(guest_expire_days).map_err(|_| {
                ConfigError::InvalidValue {
                    var: GUEST_EXPIRE_DAYS_VAR,
                    value: guest_expire_days.to_string(),
                    expected: "days",
                }
            })?,
            guest_sweep_interval: Duration::from_secs(sweep_secs),
        })
    }
}
