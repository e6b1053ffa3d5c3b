//! Runtime configuration for the ledger and the reconciliation coordinator

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{LedgerError, LedgerResult};

/// Per-organization write-scope tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// How long a writer waits for the organization scope before backing off
    pub lock_timeout_ms: u64,
    /// Pause before the single internal retry after a lock timeout
    pub conflict_backoff_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
            conflict_backoff_ms: 50,
        }
    }
}

impl LedgerConfig {
    pub fn from_json(json: &str) -> LedgerResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LedgerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.lock_timeout_ms == 0 {
            return Err(LedgerError::InvalidConfig(
                "lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn conflict_backoff(&self) -> Duration {
        Duration::from_millis(self.conflict_backoff_ms)
    }
}

/// Matching parameters. There is no `Default`: the tolerance window and the
/// auto-match threshold are business decisions for whoever deploys the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Candidate transactions may be dated this many days either side of the import
    pub date_tolerance_days: u32,
    /// Existing-transaction candidates at or above this confidence are
    /// confirmed without a human. Rule drafts always wait. `None` never
    /// auto-confirms.
    pub auto_match_threshold: Option<f64>,
    /// Imports resolved concurrently within one batch
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

fn default_batch_concurrency() -> usize {
    4
}

impl ReconciliationConfig {
    pub fn new(date_tolerance_days: u32, auto_match_threshold: Option<f64>) -> Self {
        Self {
            date_tolerance_days,
            auto_match_threshold,
            batch_concurrency: default_batch_concurrency(),
        }
    }

    pub fn with_batch_concurrency(mut self, batch_concurrency: usize) -> Self {
        self.batch_concurrency = batch_concurrency;
        self
    }

    pub fn from_json(json: &str) -> LedgerResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LedgerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if let Some(threshold) = self.auto_match_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(LedgerError::InvalidConfig(format!(
                    "auto_match_threshold must be within [0, 1], got {}",
                    threshold
                )));
            }
        }
        if self.batch_concurrency == 0 {
            return Err(LedgerError::InvalidConfig(
                "batch_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a suggestion is strong enough to confirm on its own
    pub fn auto_confirms(&self, confidence: f64) -> bool {
        self.auto_match_threshold
            .is_some_and(|threshold| confidence >= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconciliation_config_from_json() {
        let config = ReconciliationConfig::from_json(
            r#"{"date_tolerance_days": 3, "auto_match_threshold": 0.95}"#,
        )
        .unwrap();
        assert_eq!(config.date_tolerance_days, 3);
        assert_eq!(config.batch_concurrency, 4);
        assert!(config.auto_confirms(0.95));
        assert!(!config.auto_confirms(0.9));
    }

    #[test]
    fn reconciliation_config_requires_tolerance() {
        assert!(ReconciliationConfig::from_json(r#"{"auto_match_threshold": null}"#).is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let config = ReconciliationConfig::new(2, Some(1.5));
        assert!(matches!(
            config.validate(),
            Err(LedgerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn ledger_config_defaults_fill_missing_fields() {
        let config = LedgerConfig::from_json(r#"{"lock_timeout_ms": 10}"#).unwrap();
        assert_eq!(config.lock_timeout_ms, 10);
        assert_eq!(config.conflict_backoff_ms, 50);
        assert!(LedgerConfig::from_json(r#"{"lock_timeout_ms": 0}"#).is_err());
    }
}
