//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::reconciliation::balance::BalanceEvaluator;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_line;

#[derive(Debug, Default)]
struct StoreState {
    lines: BTreeMap<String, LedgerLine>,
    groups: BTreeMap<String, ReconciliationGroup>,
}

/// In-memory storage implementation for testing and development
///
/// Clones share the same data, so one instance can serve as both the
/// repository and the writer of a service. Each write holds the lock for
/// its whole duration, which makes it a single transaction.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<StoreState>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new line
    pub fn insert_line(&self, line: LedgerLine) -> ReconciliationResult<()> {
        validate_line(&line)?;
        let mut state = self.write()?;
        if state.lines.contains_key(&line.id) {
            return Err(ReconciliationError::Validation(format!(
                "Line '{}' already exists",
                line.id
            )));
        }
        state.lines.insert(line.id.clone(), line);
        Ok(())
    }

    /// Insert several lines
    pub fn insert_lines<I>(&self, lines: I) -> ReconciliationResult<()>
    where
        I: IntoIterator<Item = LedgerLine>,
    {
        for line in lines {
            self.insert_line(line)?;
        }
        Ok(())
    }

    /// Insert a line delivered with decimal amounts
    pub fn insert_record(
        &self,
        record: LedgerLineRecord,
        minor_digits: u32,
    ) -> ReconciliationResult<()> {
        self.insert_line(record.into_line(minor_digits)?)
    }

    /// Get a line by ID, whatever its state
    pub fn line(&self, line_id: &str) -> ReconciliationResult<Option<LedgerLine>> {
        Ok(self.read()?.lines.get(line_id).cloned())
    }

    /// Every line of an account, including reconciled and reversed ones
    pub fn lines_for_account(&self, account_id: &str) -> ReconciliationResult<Vec<LedgerLine>> {
        Ok(self
            .read()?
            .lines
            .values()
            .filter(|line| line.account_id == account_id)
            .cloned()
            .collect())
    }

    /// Every group of an account
    pub fn groups_for_account(
        &self,
        account_id: &str,
    ) -> ReconciliationResult<Vec<ReconciliationGroup>> {
        Ok(self
            .read()?
            .groups
            .values()
            .filter(|group| group.account_id == account_id)
            .cloned()
            .collect())
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> ReconciliationResult<()> {
        let mut state = self.write()?;
        state.lines.clear();
        state.groups.clear();
        Ok(())
    }

    fn read(&self) -> ReconciliationResult<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| ReconciliationError::Storage("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> ReconciliationResult<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| ReconciliationError::Storage("memory storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerLineRepository for MemoryStorage {
    async fn fetch_unreconciled_lines(
        &self,
        account_id: &str,
        period: Option<&PeriodFilter>,
    ) -> ReconciliationResult<Vec<LedgerLine>> {
        let state = self.read()?;
        let mut lines: Vec<LedgerLine> = state
            .lines
            .values()
            .filter(|line| {
                line.account_id == account_id
                    && line.is_open()
                    && period.is_none_or(|p| p.contains(line.entry_date))
            })
            .cloned()
            .collect();
        lines.sort_by(|a, b| (a.entry_date, &a.id).cmp(&(b.entry_date, &b.id)));
        Ok(lines)
    }

    async fn fetch_account_statistics(
        &self,
        account_id: &str,
    ) -> ReconciliationResult<AccountStatistics> {
        let state = self.read()?;
        let open: Vec<&LedgerLine> = state
            .lines
            .values()
            .filter(|line| line.account_id == account_id && line.is_open())
            .collect();
        let (debit, credit) = BalanceEvaluator::totals(open.iter().copied())?;

        Ok(AccountStatistics {
            account_id: account_id.to_string(),
            total_unreconciled: open.len(),
            unreconciled_debit: debit,
            unreconciled_credit: credit,
            unreconciled_amount: debit - credit,
        })
    }

    async fn fetch_lines(&self, line_ids: &[String]) -> ReconciliationResult<Vec<LedgerLine>> {
        let state = self.read()?;
        let ids: BTreeSet<&String> = line_ids.iter().collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| state.lines.get(id).cloned())
            .collect())
    }

    async fn fetch_group(
        &self,
        group_id: &str,
    ) -> ReconciliationResult<Option<ReconciliationGroup>> {
        Ok(self.read()?.groups.get(group_id).cloned())
    }
}

#[async_trait]
impl ReconciliationWriter for MemoryStorage {
    async fn commit_groups(&self, batch: &CommitBatch) -> ReconciliationResult<()> {
        let mut state = self.write()?;

        let new_lines: HashSet<&str> = batch
            .difference_lines
            .iter()
            .map(|line| line.id.as_str())
            .collect();
        for line in &batch.difference_lines {
            validate_line(line)?;
            if state.lines.contains_key(&line.id) {
                return Err(ReconciliationError::Storage(format!(
                    "difference line '{}' already exists",
                    line.id
                )));
            }
        }

        let mut claimed: HashSet<&str> = HashSet::new();
        let mut conflicts: Vec<String> = Vec::new();
        for group in &batch.groups {
            if state.groups.contains_key(&group.group_id) {
                return Err(ReconciliationError::Storage(format!(
                    "group '{}' already exists",
                    group.group_id
                )));
            }
            for id in &group.member_line_ids {
                if new_lines.contains(id.as_str()) {
                    continue;
                }
                let open = state
                    .lines
                    .get(id)
                    .is_some_and(|line| line.is_open() && line.account_id == group.account_id);
                if !open || !claimed.insert(id.as_str()) {
                    conflicts.push(id.clone());
                }
            }
        }
        if !conflicts.is_empty() {
            return Err(ReconciliationError::ConcurrentModification {
                account_id: batch.account_id.clone(),
                line_ids: conflicts,
            });
        }

        // checks passed, nothing below can fail
        for line in &batch.difference_lines {
            state.lines.insert(line.id.clone(), line.clone());
        }
        for group in &batch.groups {
            for id in &group.member_line_ids {
                if let Some(line) = state.lines.get_mut(id) {
                    line.reconciled = true;
                    line.reconciliation_group_id = Some(group.group_id.clone());
                }
            }
            state.groups.insert(group.group_id.clone(), group.clone());
        }

        Ok(())
    }

    async fn release_group(&self, group: &ReconciliationGroup) -> ReconciliationResult<()> {
        let mut state = self.write()?;
        let stored = state
            .groups
            .get(&group.group_id)
            .cloned()
            .ok_or_else(|| ReconciliationError::GroupNotFound(group.group_id.clone()))?;

        let stale: Vec<String> = stored
            .member_line_ids
            .iter()
            .filter(|id| {
                state.lines.get(*id).is_none_or(|line| {
                    line.reconciliation_group_id.as_deref() != Some(stored.group_id.as_str())
                })
            })
            .cloned()
            .collect();
        if !stale.is_empty() {
            return Err(ReconciliationError::ConcurrentModification {
                account_id: stored.account_id.clone(),
                line_ids: stale,
            });
        }

        for id in &stored.member_line_ids {
            if let Some(line) = state.lines.get_mut(id) {
                line.reconciled = false;
                line.reconciliation_group_id = None;
                if line.generated_difference {
                    line.reversed = true;
                }
            }
        }
        state.groups.remove(&stored.group_id);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use chrono::{NaiveDate, Utc};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, day).unwrap()
    }

    fn seeded() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage
            .insert_lines(vec![
                LedgerLine::debit("a", "411", date(1), "F1", Amount::from_minor(1000)),
                LedgerLine::credit("b", "411", date(2), "R1", Amount::from_minor(1000)),
                LedgerLine::debit("c", "411", date(20), "F2", Amount::from_minor(300)),
                LedgerLine::credit("x", "401", date(1), "S1", Amount::from_minor(50)),
            ])
            .unwrap();
        storage
    }

    fn group(id: &str, members: &[&str]) -> ReconciliationGroup {
        ReconciliationGroup {
            group_id: id.to_string(),
            account_id: "411".to_string(),
            member_line_ids: members.iter().map(|s| s.to_string()).collect(),
            net_balance: Amount::ZERO,
            created_at: Utc::now().naive_utc(),
            origin: GroupOrigin::Manual,
            algorithm_used: None,
            confidence_score: None,
            generated_difference: false,
            difference_line_id: None,
        }
    }

    fn batch(groups: Vec<ReconciliationGroup>) -> CommitBatch {
        CommitBatch {
            account_id: "411".to_string(),
            groups,
            difference_lines: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_fetch_unreconciled_lines_filters_account_and_period() {
        let storage = seeded();
        let lines = storage.fetch_unreconciled_lines("411", None).await.unwrap();
        assert_eq!(lines.len(), 3);

        let period = PeriodFilter::between(date(1), date(10));
        let lines = storage
            .fetch_unreconciled_lines("411", Some(&period))
            .await
            .unwrap();
        let ids: Vec<&str> = lines.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_account_statistics() {
        let storage = seeded();
        let stats = storage.fetch_account_statistics("411").await.unwrap();
        assert_eq!(stats.total_unreconciled, 3);
        assert_eq!(stats.unreconciled_debit, Amount::from_minor(1300));
        assert_eq!(stats.unreconciled_credit, Amount::from_minor(1000));
        assert_eq!(stats.unreconciled_amount, Amount::from_minor(300));
    }

    #[tokio::test]
    async fn test_commit_marks_lines() {
        let storage = seeded();
        storage
            .commit_groups(&batch(vec![group("g1", &["a", "b"])]))
            .await
            .unwrap();

        let line = storage.line("a").unwrap().unwrap();
        assert!(line.reconciled);
        assert_eq!(line.reconciliation_group_id.as_deref(), Some("g1"));
        assert!(storage.fetch_group("g1").await.unwrap().is_some());
        assert_eq!(
            storage.fetch_unreconciled_lines("411", None).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_commit_conflict_applies_nothing() {
        let storage = seeded();
        storage
            .commit_groups(&batch(vec![group("g1", &["a", "b"])]))
            .await
            .unwrap();

        let err = storage
            .commit_groups(&batch(vec![group("g2", &["c", "b"])]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReconciliationError::ConcurrentModification {
                account_id: "411".to_string(),
                line_ids: vec!["b".to_string()],
            }
        );
        assert!(storage.line("c").unwrap().unwrap().is_open());
        assert!(storage.fetch_group("g2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_rejects_line_claimed_twice_in_batch() {
        let storage = seeded();
        let err = storage
            .commit_groups(&batch(vec![group("g1", &["a", "b"]), group("g2", &["b", "c"])]))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(storage.line("a").unwrap().unwrap().is_open());
    }

    #[tokio::test]
    async fn test_release_restores_lines() {
        let storage = seeded();
        let before = storage.line("a").unwrap().unwrap();
        let g = group("g1", &["a", "b"]);
        storage.commit_groups(&batch(vec![g.clone()])).await.unwrap();
        storage.release_group(&g).await.unwrap();

        assert_eq!(storage.line("a").unwrap().unwrap(), before);
        assert!(storage.fetch_group("g1").await.unwrap().is_none());

        let err = storage.release_group(&g).await.unwrap_err();
        assert_eq!(err, ReconciliationError::GroupNotFound("g1".to_string()));
    }

    #[test]
    fn test_insert_rejects_duplicates_and_invalid_lines() {
        let storage = seeded();
        let duplicate = LedgerLine::debit("a", "411", date(1), "", Amount::from_minor(1));
        assert!(storage.insert_line(duplicate).is_err());

        let negative = LedgerLine::debit("n", "411", date(1), "", Amount::from_minor(-1));
        assert!(storage.insert_line(negative).is_err());
    }
}
