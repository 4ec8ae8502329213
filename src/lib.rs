//! # Lettrage Core
//!
//! A ledger-line reconciliation library: groups the open invoices, payments
//! and credit notes of a third-party account into balanced sets, either
//! automatically or from a user selection.
//!
//! ## Features
//!
//! - **Fixed-point amounts**: all matching arithmetic in integer minor units
//! - **Automatic matching**: exact pairs, shared references, bounded subset-sum and date proximity
//! - **Confidence scoring**: configurable auto-commit threshold, ranked suggestions for the rest
//! - **Manual reconciliation**: balance validation with tolerance-based difference entries
//! - **De-reconciliation**: exact inverse of a commit, difference entries reversed not deleted
//! - **Storage abstraction**: database-agnostic design with trait-based repository and writer
//!
//! ## Quick Start
//!
//! ```rust
//! use lettrage_core::utils::MemoryStorage;
//! use lettrage_core::{Amount, LedgerLine, ReconciliationService};
//! use chrono::NaiveDate;
//!
//! let storage = MemoryStorage::new();
//! let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
//! let invoice = LedgerLine::debit("inv-1", "411C01", date, "FAC-001", Amount::from_minor(75000));
//! storage.insert_line(invoice).unwrap();
//!
//! let service = ReconciliationService::new(storage.clone(), storage);
//! // service.run_automatic_reconciliation("411C01", &selector, &config).await
//! ```

pub mod amount;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use amount::Amount;
pub use reconciliation::{
    BalanceEvaluator, MatchingEngine, ReconciliationConfig, ReconciliationService,
    ReconciliationStatistics, RunOptions, StrategySelector, SuggestionRanker, ToleranceThreshold,
};
pub use traits::*;
pub use types::*;
