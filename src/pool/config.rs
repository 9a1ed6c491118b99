use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SqlPoolError;
use crate::transaction::TxDropPolicy;

use super::database::DatabasePool;
use super::types::ConnectionPool;

/// Options for the pooled proxies.
///
/// ```rust
/// use sql_pooled::prelude::*;
///
/// let opts = PoolOptions::from_json(r#"{ "statement_max_idle_time": 120 }"#).unwrap();
/// assert_eq!(opts.max_idle_time().as_secs(), 120);
/// assert_eq!(opts.statement_sweep_interval, 5.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Seconds a prepared statement may sit idle before the sweep closes it (0 = never).
    pub statement_max_idle_time: u64,
    /// Seconds between sweeps of a statement's affinity cache (0 = no sweeping).
    pub statement_sweep_interval: f64,
    /// What to do with a transaction dropped while still active.
    pub transaction_drop_policy: TxDropPolicy,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            statement_max_idle_time: 60,
            statement_sweep_interval: 5.0,
            transaction_drop_policy: TxDropPolicy::default(),
        }
    }
}

impl PoolOptions {
    #[must_use]
    pub fn builder() -> PoolOptionsBuilder {
        PoolOptionsBuilder::new()
    }

    /// Parse options from JSON; missing fields keep their defaults.
    ///
    /// # Errors
    /// Returns `SqlPoolError::ConfigError` for malformed JSON or invalid values.
    pub fn from_json(json: &str) -> Result<Self, SqlPoolError> {
        let opts: PoolOptions = serde_json::from_str(json)
            .map_err(|e| SqlPoolError::ConfigError(format!("invalid pool options: {e}")))?;
        opts.validate()?;
        Ok(opts)
    }

    /// # Errors
    /// Returns `SqlPoolError::ConfigError` when the sweep interval is negative or not finite.
    pub fn validate(&self) -> Result<(), SqlPoolError> {
        validate_sweep_interval(self.statement_sweep_interval)
    }

    #[must_use]
    pub fn max_idle_time(&self) -> Duration {
        Duration::from_secs(self.statement_max_idle_time)
    }

    /// Sweep interval, rounded to whole milliseconds.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        seconds_to_duration(self.statement_sweep_interval)
    }
}

pub(crate) fn validate_sweep_interval(seconds: f64) -> Result<(), SqlPoolError> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(SqlPoolError::ConfigError(format!(
            "statement sweep interval must be a non-negative number of seconds, got {seconds}"
        )));
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn seconds_to_duration(seconds: f64) -> Duration {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_millis((seconds * 1000.0).round() as u64)
}

/// Fluent builder for [`PoolOptions`].
#[derive(Debug, Clone, Default)]
pub struct PoolOptionsBuilder {
    opts: PoolOptions,
}

impl PoolOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            opts: PoolOptions::default(),
        }
    }

    #[must_use]
    pub fn statement_max_idle_time(mut self, seconds: u64) -> Self {
        self.opts.statement_max_idle_time = seconds;
        self
    }

    #[must_use]
    pub fn statement_sweep_interval(mut self, seconds: f64) -> Self {
        self.opts.statement_sweep_interval = seconds;
        self
    }

    #[must_use]
    pub fn transaction_drop_policy(mut self, policy: TxDropPolicy) -> Self {
        self.opts.transaction_drop_policy = policy;
        self
    }

    #[must_use]
    pub fn finish(self) -> PoolOptions {
        self.opts
    }

    /// Wrap `pool` in a [`DatabasePool`] using these options.
    ///
    /// # Errors
    /// Returns `SqlPoolError::ConfigError` if the options are invalid.
    pub fn build<P: ConnectionPool>(self, pool: P) -> Result<DatabasePool<P>, SqlPoolError> {
        self.opts.validate()?;
        Ok(DatabasePool::new(pool, self.opts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let opts = PoolOptions::default();
        assert_eq!(opts.max_idle_time(), Duration::from_secs(60));
        assert_eq!(opts.sweep_interval(), Duration::from_secs(5));
        assert_eq!(opts.transaction_drop_policy, TxDropPolicy::Commit);
    }

    #[test]
    fn sub_second_interval_keeps_millisecond_precision() {
        let opts = PoolOptions::builder().statement_sweep_interval(0.25).finish();
        assert_eq!(opts.sweep_interval(), Duration::from_millis(250));
    }

    #[test]
    fn zero_values_disable_sweeping_and_idle_eviction() {
        let opts = PoolOptions::builder()
            .statement_max_idle_time(0)
            .statement_sweep_interval(0.0)
            .finish();
        assert!(opts.validate().is_ok());
        assert_eq!(opts.max_idle_time(), Duration::ZERO);
        assert_eq!(opts.sweep_interval(), Duration::ZERO);
    }

    #[test]
    fn negative_interval_is_rejected() {
        let opts = PoolOptions::builder().statement_sweep_interval(-1.0).finish();
        assert!(matches!(opts.validate(), Err(SqlPoolError::ConfigError(_))));
        assert!(matches!(
            PoolOptions::from_json(r#"{ "statement_sweep_interval": -0.5 }"#),
            Err(SqlPoolError::ConfigError(_))
        ));
    }

    #[test]
    fn json_reads_drop_policy() {
        let opts = PoolOptions::from_json(
            r#"{ "statement_sweep_interval": 1.5, "transaction_drop_policy": "rollback" }"#,
        )
        .expect("valid options");
        assert_eq!(opts.transaction_drop_policy, TxDropPolicy::Rollback);
        assert_eq!(opts.sweep_interval(), Duration::from_millis(1500));
        assert_eq!(opts.statement_max_idle_time, 60);
    }
}
