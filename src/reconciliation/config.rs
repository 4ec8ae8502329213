//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::amount::{Amount, MAX_LINE_MINOR_UNITS, MAX_MINOR_DIGITS};
use crate::reconciliation::balance::ToleranceThreshold;
use crate::types::{ReconciliationError, ReconciliationResult};

/// Largest group the subset search may be configured to build
pub const MAX_GROUP_SIZE: usize = 12;

/// Bounds on the subset-sum search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchBudget {
    /// Candidate extensions explored before the search gives up
    pub max_iterations: u64,
    /// Optional wall-clock cap, in milliseconds
    pub max_duration_ms: Option<u64>,
}

impl Default for SearchBudget {
    fn default() -> Self {
        Self {
            max_iterations: 200_000,
            max_duration_ms: None,
        }
    }
}

impl SearchBudget {
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_ms.map(Duration::from_millis)
    }
}

/// Reconciliation engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub tolerance: ToleranceThreshold,
    /// Minimum confidence for a balanced group to be committed unattended
    pub auto_commit_threshold: u8,
    /// Largest group the subset search builds
    pub max_group_size: usize,
    /// Largest number of lines the subset search considers per account
    pub max_pool_size: usize,
    /// Date window of the proximity heuristic, in days
    pub date_window_days: i64,
    /// Largest residual of a proximity pair, in basis points of its larger line
    pub proximity_ratio_bps: u32,
    pub search_budget: SearchBudget,
    /// Extra commit attempts after a concurrent modification
    pub max_commit_retries: u32,
    /// Decimal places of the account currency
    pub minor_digits: u32,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            tolerance: ToleranceThreshold::default(),
            auto_commit_threshold: 90,
            max_group_size: 6,
            max_pool_size: 500,
            date_window_days: 15,
            proximity_ratio_bps: 2000,
            search_budget: SearchBudget::default(),
            max_commit_retries: 1,
            minor_digits: 2,
        }
    }
}

impl ReconciliationConfig {
    /// Loads configuration from `LETTRAGE__*` environment variables
    ///
    /// Nested fields use `__` as separator, e.g.
    /// `LETTRAGE__TOLERANCE__DIFFERENCE_CEILING=500`. Unset fields keep
    /// their default value.
    pub fn from_env() -> ReconciliationResult<Self> {
        let config: Self = ::config::Config::builder()
            .add_source(
                ::config::Environment::with_prefix("LETTRAGE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(|e| ReconciliationError::InvalidConfiguration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Set the auto-commit threshold
    pub fn with_auto_commit_threshold(mut self, threshold: u8) -> Self {
        self.auto_commit_threshold = threshold;
        self
    }

    /// Set the tolerance thresholds
    pub fn with_tolerance(mut self, tolerance: ToleranceThreshold) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Check that the values are consistent
    pub fn validate(&self) -> ReconciliationResult<()> {
        let invalid = |msg: &str| Err(ReconciliationError::InvalidConfiguration(msg.to_string()));

        if self.tolerance.strict_tolerance.is_negative() {
            return invalid("strict tolerance cannot be negative");
        }
        if self.tolerance.difference_ceiling < self.tolerance.strict_tolerance {
            return invalid("difference ceiling cannot be below the strict tolerance");
        }
        if self.tolerance.difference_ceiling > Amount::from_minor(MAX_LINE_MINOR_UNITS) {
            return invalid("difference ceiling cannot exceed the line amount limit");
        }
        if self.auto_commit_threshold > 100 {
            return invalid("auto-commit threshold must be between 0 and 100");
        }
        if !(2..=MAX_GROUP_SIZE).contains(&self.max_group_size) {
            return invalid("max group size must be between 2 and 12");
        }
        if self.max_pool_size < 2 {
            return invalid("max pool size must be at least 2");
        }
        if self.date_window_days < 0 {
            return invalid("date window cannot be negative");
        }
        if self.proximity_ratio_bps > 10_000 {
            return invalid("proximity ratio cannot exceed 10000 basis points");
        }
        if self.minor_digits > MAX_MINOR_DIGITS {
            return invalid("too many minor digits");
        }

        Ok(())
    }
}
