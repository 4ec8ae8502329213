//! Traits for storage abstraction

use async_trait::async_trait;

use crate::types::*;

/// Read side of the ledger line store
///
/// This trait allows the reconciliation engine to work with any storage
/// backend (PostgreSQL, MySQL, SQLite, in-memory, etc.). Implementations
/// convert their decimal columns to [`crate::Amount`] before returning lines.
#[async_trait]
pub trait LedgerLineRepository: Send + Sync {
    /// Fetch the open lines of an account, optionally restricted to a period
    ///
    /// Reconciled and reversed lines are never returned.
    async fn fetch_unreconciled_lines(
        &self,
        account_id: &str,
        period: Option<&PeriodFilter>,
    ) -> ReconciliationResult<Vec<LedgerLine>>;

    /// Count and sum the open lines of an account
    async fn fetch_account_statistics(
        &self,
        account_id: &str,
    ) -> ReconciliationResult<AccountStatistics>;

    /// Fetch lines by id, whatever their state; unknown ids are omitted
    async fn fetch_lines(&self, line_ids: &[String]) -> ReconciliationResult<Vec<LedgerLine>>;

    /// Fetch a reconciliation group by id
    async fn fetch_group(&self, group_id: &str)
        -> ReconciliationResult<Option<ReconciliationGroup>>;
}

/// Write side of the ledger line store
///
/// Every method is a single transaction: either all of its changes are
/// applied or none are.
#[async_trait]
pub trait ReconciliationWriter: Send + Sync {
    /// Persist groups, stamp their member lines and insert difference entries
    ///
    /// Must fail with [`ReconciliationError::ConcurrentModification`] without
    /// applying anything if a member line is no longer open.
    async fn commit_groups(&self, batch: &CommitBatch) -> ReconciliationResult<()>;

    /// Delete a group, reopen its lines and mark its difference entry reversed
    ///
    /// Must fail with [`ReconciliationError::GroupNotFound`] if the group no
    /// longer exists.
    async fn release_group(&self, group: &ReconciliationGroup) -> ReconciliationResult<()>;
}
