//! Core types and data structures for the reconciliation engine

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::amount::Amount;

/// One debit or credit movement on a third-party sub-account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLine {
    /// Opaque line identifier
    pub id: String,
    /// Account the line is posted to
    pub account_id: String,
    /// Accounting date of the entry
    pub entry_date: NaiveDate,
    /// Piece reference (invoice number, payment reference...)
    pub piece_reference: String,
    /// Free text label
    pub label: String,
    /// Debit amount, never negative
    pub debit_amount: Amount,
    /// Credit amount, never negative
    pub credit_amount: Amount,
    /// Optional third-party code
    pub third_party_code: Option<String>,
    /// Whether the line belongs to a reconciliation group
    pub reconciled: bool,
    /// Group the line belongs to, if any
    pub reconciliation_group_id: Option<String>,
    /// Set on lines created by the engine to absorb a residual
    pub generated_difference: bool,
    /// Set when a generated difference entry has been reversed
    pub reversed: bool,
}

impl LedgerLine {
    /// Create a new, unreconciled line
    pub fn new(
        id: String,
        account_id: String,
        entry_date: NaiveDate,
        piece_reference: String,
        label: String,
        debit_amount: Amount,
        credit_amount: Amount,
    ) -> Self {
        Self {
            id,
            account_id,
            entry_date,
            piece_reference,
            label,
            debit_amount,
            credit_amount,
            third_party_code: None,
            reconciled: false,
            reconciliation_group_id: None,
            generated_difference: false,
            reversed: false,
        }
    }

    /// Create a debit line
    pub fn debit(
        id: impl Into<String>,
        account_id: impl Into<String>,
        entry_date: NaiveDate,
        piece_reference: impl Into<String>,
        amount: Amount,
    ) -> Self {
        Self::new(
            id.into(),
            account_id.into(),
            entry_date,
            piece_reference.into(),
            String::new(),
            amount,
            Amount::ZERO,
        )
    }

    /// Create a credit line
    pub fn credit(
        id: impl Into<String>,
        account_id: impl Into<String>,
        entry_date: NaiveDate,
        piece_reference: impl Into<String>,
        amount: Amount,
    ) -> Self {
        Self::new(
            id.into(),
            account_id.into(),
            entry_date,
            piece_reference.into(),
            String::new(),
            Amount::ZERO,
            amount,
        )
    }

    /// Set the label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the third-party code
    pub fn with_third_party(mut self, code: impl Into<String>) -> Self {
        self.third_party_code = Some(code.into());
        self
    }

    /// Signed value: debit minus credit
    pub fn signed_amount(&self) -> Amount {
        Amount::from_minor(
            self.debit_amount
                .minor_units()
                .saturating_sub(self.credit_amount.minor_units()),
        )
    }

    /// Whether both sides are non-negative and within the line limit
    pub fn has_valid_amounts(&self) -> bool {
        [self.debit_amount, self.credit_amount]
            .iter()
            .all(|amount| !amount.is_negative() && amount.is_within_line_limit())
    }

    /// Whether the line can still be claimed by a group
    pub fn is_open(&self) -> bool {
        !self.reconciled && self.reconciliation_group_id.is_none() && !self.reversed
    }
}

/// Ledger line as delivered by a storage adapter, with decimal amounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerLineRecord {
    pub id: String,
    pub account_id: String,
    pub entry_date: NaiveDate,
    pub piece_reference: String,
    pub label: String,
    pub debit_amount: BigDecimal,
    pub credit_amount: BigDecimal,
    pub third_party_code: Option<String>,
}

impl LedgerLineRecord {
    /// Convert into an engine line, scaling amounts to minor units
    pub fn into_line(self, minor_digits: u32) -> ReconciliationResult<LedgerLine> {
        let debit = Amount::from_decimal(&self.debit_amount, minor_digits)?;
        let credit = Amount::from_decimal(&self.credit_amount, minor_digits)?;

        let mut line = LedgerLine::new(
            self.id,
            self.account_id,
            self.entry_date,
            self.piece_reference,
            self.label,
            debit,
            credit,
        );
        line.third_party_code = self.third_party_code;
        Ok(line)
    }
}

/// Matching algorithm, also used to select strategies for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchAlgorithm {
    /// Two lines with exactly opposite amounts
    ExactPair,
    /// Lines sharing a piece reference root
    ExactReference,
    /// Bounded subset search within tolerance
    SubsetSum,
    /// Close amounts within a date window, suggestion only
    DateProximity,
}

impl MatchAlgorithm {
    /// Canonical execution order
    pub const ORDERED: [MatchAlgorithm; 4] = [
        MatchAlgorithm::ExactPair,
        MatchAlgorithm::ExactReference,
        MatchAlgorithm::SubsetSum,
        MatchAlgorithm::DateProximity,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            MatchAlgorithm::ExactPair => "EXACT_PAIR",
            MatchAlgorithm::ExactReference => "EXACT_REFERENCE",
            MatchAlgorithm::SubsetSum => "SUBSET_SUM",
            MatchAlgorithm::DateProximity => "DATE_PROXIMITY",
        }
    }
}

impl fmt::Display for MatchAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// How a group came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupOrigin {
    Automatic,
    Manual,
}

/// Set of ledger lines marked as mutually settling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationGroup {
    pub group_id: String,
    pub account_id: String,
    /// Member lines, difference entry included
    pub member_line_ids: Vec<String>,
    /// Net balance of all members
    pub net_balance: Amount,
    pub created_at: NaiveDateTime,
    pub origin: GroupOrigin,
    pub algorithm_used: Option<MatchAlgorithm>,
    /// 0-100, automatic groups only
    pub confidence_score: Option<u8>,
    /// Whether a difference entry was generated for this group
    pub generated_difference: bool,
    pub difference_line_id: Option<String>,
}

/// Proposed group awaiting human review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSuggestion {
    pub account_id: String,
    pub candidate_line_ids: Vec<String>,
    pub confidence_score: u8,
    pub net_balance: Amount,
    pub algorithm: MatchAlgorithm,
    /// Earliest entry date among the candidate lines
    pub earliest_entry_date: NaiveDate,
    /// Why the lines were proposed together
    pub rationale: String,
}

/// Metadata describing one automatic run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    pub account_id: String,
    pub lines_processed: usize,
    /// Lines claimed by committed groups
    pub lines_reconciled: usize,
    pub groups_formed: usize,
    pub suggestions: usize,
    pub elapsed_millis: u64,
    pub strategies_run: Vec<MatchAlgorithm>,
    /// Strategies stopped early by the search budget
    pub exhausted_strategies: Vec<MatchAlgorithm>,
    /// Whether the subset search pool was capped
    pub pool_truncated: bool,
    pub commit_attempts: u32,
}

/// Outcome of an automatic run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRun {
    pub groups_committed: Vec<ReconciliationGroup>,
    pub suggestions: Vec<MatchSuggestion>,
    pub stats: RunMetadata,
}

/// Open-line figures for an account
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountStatistics {
    pub account_id: String,
    pub total_unreconciled: usize,
    pub unreconciled_debit: Amount,
    pub unreconciled_credit: Amount,
    /// Signed net of the open lines
    pub unreconciled_amount: Amount,
}

/// Inclusive date bounds applied to `entry_date`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeriodFilter {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl PeriodFilter {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|start| date >= start) && self.end.is_none_or(|end| date <= end)
    }
}

/// Everything a writer must persist for one account in one transaction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommitBatch {
    pub account_id: String,
    pub groups: Vec<ReconciliationGroup>,
    /// New difference entries, already stamped with their group
    pub difference_lines: Vec<LedgerLine>,
}

/// Errors that can occur in the reconciliation engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconciliationError {
    #[error("At least two lines are required, {selected} selected")]
    InsufficientSelection { selected: usize },
    #[error("Selection spans several accounts: {}", account_ids.join(", "))]
    CrossAccountSelection { account_ids: Vec<String> },
    #[error("Lines already reconciled: {}", line_ids.join(", "))]
    AlreadyReconciled { line_ids: Vec<String> },
    #[error("Selection is unbalanced by {residual} (ceiling {ceiling})")]
    UnbalancedSelection {
        residual: Amount,
        ceiling: Amount,
        line_ids: Vec<String>,
    },
    #[error("Reconciliation group not found: {0}")]
    GroupNotFound(String),
    #[error("Unknown ledger lines: {}", line_ids.join(", "))]
    UnknownLines { line_ids: Vec<String> },
    #[error("Reversed lines cannot be reconciled: {}", line_ids.join(", "))]
    ReversedLines { line_ids: Vec<String> },
    #[error("Concurrent modification on account {account_id}: {}", line_ids.join(", "))]
    ConcurrentModification {
        account_id: String,
        line_ids: Vec<String>,
    },
    #[error("Search budget exceeded in {strategy} after {iterations} iterations")]
    SearchBudgetExceeded {
        strategy: MatchAlgorithm,
        iterations: u64,
    },
    #[error("Reconciliation run cancelled for account {account_id}")]
    Cancelled { account_id: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ReconciliationError {
    /// Errors the caller can fix by changing its input
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ReconciliationError::InsufficientSelection { .. }
                | ReconciliationError::CrossAccountSelection { .. }
                | ReconciliationError::AlreadyReconciled { .. }
                | ReconciliationError::UnbalancedSelection { .. }
                | ReconciliationError::GroupNotFound(_)
                | ReconciliationError::UnknownLines { .. }
                | ReconciliationError::ReversedLines { .. }
                | ReconciliationError::Validation(_)
        )
    }

    /// Errors that may succeed on a fresh snapshot
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconciliationError::ConcurrentModification { .. })
    }
}

/// Result type for reconciliation operations
pub type ReconciliationResult<T> = Result<T, ReconciliationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn test_signed_amount() {
        let invoice =
            LedgerLine::debit("l1", "411CLI", date(1), "FAC-001", Amount::from_minor(75000));
        let payment =
            LedgerLine::credit("l2", "411CLI", date(2), "REG-001", Amount::from_minor(60000));
        assert_eq!(invoice.signed_amount(), Amount::from_minor(75000));
        assert_eq!(payment.signed_amount(), Amount::from_minor(-60000));
        assert!(invoice.is_open());
        assert!(invoice.has_valid_amounts());

        let huge = LedgerLine::debit("l3", "411CLI", date(3), "", Amount::from_minor(i64::MAX));
        assert!(!huge.has_valid_amounts());
    }

    #[test]
    fn test_record_conversion() {
        let record = LedgerLineRecord {
            id: "l1".to_string(),
            account_id: "401SUP".to_string(),
            entry_date: date(4),
            piece_reference: "INV-77".to_string(),
            label: "Supplier invoice".to_string(),
            debit_amount: BigDecimal::from(0),
            credit_amount: BigDecimal::from_str("4998.00").unwrap(),
            third_party_code: Some("SUP01".to_string()),
        };

        let line = record.into_line(2).unwrap();
        assert_eq!(line.credit_amount, Amount::from_minor(499800));
        assert_eq!(line.third_party_code.as_deref(), Some("SUP01"));
        assert!(!line.reconciled);
    }

    #[test]
    fn test_period_filter() {
        let period = PeriodFilter::between(date(5), date(10));
        assert!(period.contains(date(5)));
        assert!(period.contains(date(10)));
        assert!(!period.contains(date(11)));
        assert!(PeriodFilter::default().contains(date(1)));
    }

    #[test]
    fn test_error_classification() {
        let unbalanced = ReconciliationError::UnbalancedSelection {
            residual: Amount::from_minor(50000),
            ceiling: Amount::from_minor(1000),
            line_ids: vec!["a".to_string(), "b".to_string()],
        };
        assert!(unbalanced.is_validation());
        assert!(!unbalanced.is_retryable());
        assert_eq!(
            unbalanced.to_string(),
            "Selection is unbalanced by 50000 (ceiling 1000)"
        );

        let conflict = ReconciliationError::ConcurrentModification {
            account_id: "411".to_string(),
            line_ids: vec!["a".to_string()],
        };
        assert!(conflict.is_retryable());
        assert!(!conflict.is_validation());
    }

    #[test]
    fn test_algorithm_serialization() {
        let json = serde_json::to_string(&MatchAlgorithm::SubsetSum).unwrap();
        assert_eq!(json, "\"SUBSET_SUM\"");
        assert_eq!(MatchAlgorithm::DateProximity.to_string(), "DATE_PROXIMITY");
    }
}
