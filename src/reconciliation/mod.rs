//! Ledger-line reconciliation (lettrage)
//!
//! Groups open debit and credit lines of one account into balanced sets,
//! either automatically through a cascade of matching strategies or from a
//! user selection validated for balance.

pub mod balance;
pub mod config;
pub mod engine;
pub mod lock;
pub mod manual;
pub mod ranker;
pub mod scoring;
pub mod service;
pub mod stats;
pub mod strategy;
mod subset;

pub use self::balance::*;
pub use self::config::*;
pub use self::engine::*;
pub use self::lock::{AccountGuard, AccountLocks};
pub use self::manual::*;
pub use self::ranker::SuggestionRanker;
pub use self::service::*;
pub use self::stats::ReconciliationStatistics;
pub use self::strategy::*;
