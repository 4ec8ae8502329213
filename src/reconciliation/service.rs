//! Reconciliation service orchestrating the engine and the storage adapters

use chrono::{NaiveDateTime, Utc};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::amount::Amount;
use crate::reconciliation::balance::BalanceEvaluator;
use crate::reconciliation::config::ReconciliationConfig;
use crate::reconciliation::engine::{CandidateGroup, MatchingEngine};
use crate::reconciliation::lock::AccountLocks;
use crate::reconciliation::manual::{ManualPlan, ManualReconciliationValidator};
use crate::reconciliation::ranker::SuggestionRanker;
use crate::reconciliation::strategy::StrategySelector;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_selection_ids;

/// Optional inputs of an automatic run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict the run to lines dated within this period
    pub period: Option<PeriodFilter>,
    /// Aborts the run before anything is committed
    pub cancel: Option<CancellationToken>,
}

/// Entry point for automatic and manual reconciliation
///
/// The service holds no reconciliation state of its own: every operation
/// reads a fresh snapshot from the repository and writes through the writer
/// in a single transaction.
pub struct ReconciliationService<R: LedgerLineRepository, W: ReconciliationWriter> {
    repository: R,
    writer: W,
    config: ReconciliationConfig,
    locks: AccountLocks,
}

impl<R: LedgerLineRepository, W: ReconciliationWriter> ReconciliationService<R, W> {
    /// Create a service with the default configuration
    pub fn new(repository: R, writer: W) -> Self {
        Self {
            repository,
            writer,
            config: ReconciliationConfig::default(),
            locks: AccountLocks::new(),
        }
    }

    /// Create a service with a custom configuration
    pub fn with_config(
        repository: R,
        writer: W,
        config: ReconciliationConfig,
    ) -> ReconciliationResult<Self> {
        config.validate()?;
        Ok(Self {
            repository,
            writer,
            config,
            locks: AccountLocks::new(),
        })
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Match the open lines of an account and commit confident groups
    pub async fn run_automatic_reconciliation(
        &self,
        account_id: &str,
        selector: &StrategySelector,
        config: &ReconciliationConfig,
    ) -> ReconciliationResult<ReconciliationRun> {
        self.run_automatic_reconciliation_with(account_id, selector, config, &RunOptions::default())
            .await
    }

    /// Same as [`Self::run_automatic_reconciliation`], with a period and a
    /// cancellation signal
    ///
    /// The account stays locked for the whole run. If the commit detects a
    /// concurrent change, the run starts over from a fresh snapshot up to
    /// `max_commit_retries` times.
    #[instrument(skip(self, selector, config, options))]
    pub async fn run_automatic_reconciliation_with(
        &self,
        account_id: &str,
        selector: &StrategySelector,
        config: &ReconciliationConfig,
        options: &RunOptions,
    ) -> ReconciliationResult<ReconciliationRun> {
        config.validate()?;
        let started = Instant::now();
        let cancel = options.cancel.as_ref();
        let _guard = self.locks.acquire(account_id).await?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let lines = self
                .repository
                .fetch_unreconciled_lines(account_id, options.period.as_ref())
                .await?;
            let plan = MatchingEngine::new(config).plan(account_id, &lines, selector, cancel)?;

            if cancel.is_some_and(CancellationToken::is_cancelled) {
                warn!("run cancelled before commit");
                return Err(ReconciliationError::Cancelled {
                    account_id: account_id.to_string(),
                });
            }

            let now = Utc::now().naive_utc();
            let groups: Vec<ReconciliationGroup> = plan
                .auto_commit()
                .map(|candidate| automatic_group(candidate, now))
                .collect();

            if !groups.is_empty() {
                let batch = CommitBatch {
                    account_id: account_id.to_string(),
                    groups: groups.clone(),
                    difference_lines: Vec::new(),
                };
                match self.commit(&batch, config).await {
                    Ok(()) => {}
                    Err(err) if err.is_retryable() && attempts <= config.max_commit_retries => {
                        warn!(
                            attempts,
                            error = %err,
                            "commit conflict, retrying from a fresh snapshot"
                        );
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            let suggestions = SuggestionRanker::rank(plan.suggestions());
            let stats = RunMetadata {
                account_id: account_id.to_string(),
                lines_processed: plan.lines_processed,
                lines_reconciled: groups.iter().map(|g| g.member_line_ids.len()).sum(),
                groups_formed: groups.len(),
                suggestions: suggestions.len(),
                elapsed_millis: started.elapsed().as_millis() as u64,
                strategies_run: plan.strategies_run,
                exhausted_strategies: plan.exhausted_strategies,
                pool_truncated: plan.pool_truncated,
                commit_attempts: attempts,
            };

            info!(
                lines = stats.lines_processed,
                groups = stats.groups_formed,
                suggestions = stats.suggestions,
                elapsed_ms = stats.elapsed_millis,
                "automatic reconciliation finished"
            );

            return Ok(ReconciliationRun {
                groups_committed: groups,
                suggestions,
                stats,
            });
        }
    }

    /// Ranked proposals for the open lines of an account; commits nothing
    #[instrument(skip(self))]
    pub async fn fetch_suggestions(
        &self,
        account_id: &str,
    ) -> ReconciliationResult<Vec<MatchSuggestion>> {
        let lines = self
            .repository
            .fetch_unreconciled_lines(account_id, None)
            .await?;
        let plan = MatchingEngine::new(&self.config).plan(
            account_id,
            &lines,
            &StrategySelector::all(),
            None,
        )?;
        Ok(SuggestionRanker::rank(plan.all_suggestions()))
    }

    /// Reconcile a user selection, generating a difference entry if allowed
    #[instrument(skip(self, line_ids), fields(lines = line_ids.len()))]
    pub async fn commit_manual_reconciliation(
        &self,
        line_ids: &[String],
        allow_difference_entry: bool,
    ) -> ReconciliationResult<ReconciliationGroup> {
        validate_selection_ids(line_ids)?;
        let validator = ManualReconciliationValidator::new(self.config.tolerance);

        // validate once to learn the account, then again under its lock
        let lines = self.repository.fetch_lines(line_ids).await?;
        let account_id = validator
            .validate(line_ids, &lines, allow_difference_entry, now())?
            .group
            .account_id;
        let _guard = self.locks.acquire(&account_id).await?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let lines = self.repository.fetch_lines(line_ids).await?;
            let plan: ManualPlan =
                validator.validate(line_ids, &lines, allow_difference_entry, now())?;
            let group = plan.group.clone();

            match self.commit(&plan.into_batch(), &self.config).await {
                Ok(()) => {
                    info!(
                        group_id = %group.group_id,
                        account_id = %group.account_id,
                        generated_difference = group.generated_difference,
                        "manual reconciliation committed"
                    );
                    return Ok(group);
                }
                Err(err) if err.is_retryable() && attempts <= self.config.max_commit_retries => {
                    warn!(attempts, error = %err, "commit conflict, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Undo a group: reopen its lines and reverse its difference entry
    #[instrument(skip(self))]
    pub async fn reverse_reconciliation(&self, group_id: &str) -> ReconciliationResult<()> {
        let group = self
            .repository
            .fetch_group(group_id)
            .await?
            .ok_or_else(|| ReconciliationError::GroupNotFound(group_id.to_string()))?;

        let _guard = self.locks.acquire(&group.account_id).await?;
        self.writer.release_group(&group).await?;

        info!(
            account_id = %group.account_id,
            lines = group.member_line_ids.len(),
            reversed_difference = group.difference_line_id.is_some(),
            "reconciliation reversed"
        );
        Ok(())
    }

    /// Live balance of a selection, without committing anything
    ///
    /// An empty selection balances to zero.
    pub async fn compute_group_balance(&self, line_ids: &[String]) -> ReconciliationResult<Amount> {
        if line_ids.is_empty() {
            return Ok(Amount::ZERO);
        }
        validate_selection_ids(line_ids)?;
        let lines = self.repository.fetch_lines(line_ids).await?;

        let unknown: Vec<String> = line_ids
            .iter()
            .filter(|id| !lines.iter().any(|line| &line.id == *id))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ReconciliationError::UnknownLines { line_ids: unknown });
        }

        BalanceEvaluator::evaluate(&lines)
    }

    /// Open-line figures of an account
    pub async fn fetch_account_statistics(
        &self,
        account_id: &str,
    ) -> ReconciliationResult<AccountStatistics> {
        self.repository.fetch_account_statistics(account_id).await
    }

    async fn commit(
        &self,
        batch: &CommitBatch,
        config: &ReconciliationConfig,
    ) -> ReconciliationResult<()> {
        // no group leaves the engine with a residual above tolerance
        let strict = config.tolerance.strict_tolerance;
        for group in &batch.groups {
            if !BalanceEvaluator::is_balanced(group.net_balance, strict) {
                return Err(ReconciliationError::UnbalancedSelection {
                    residual: group.net_balance,
                    ceiling: config.tolerance.difference_ceiling,
                    line_ids: group.member_line_ids.clone(),
                });
            }
        }
        self.writer.commit_groups(batch).await
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn automatic_group(candidate: &CandidateGroup, created_at: NaiveDateTime) -> ReconciliationGroup {
    ReconciliationGroup {
        group_id: Uuid::new_v4().to_string(),
        account_id: candidate.account_id.clone(),
        member_line_ids: candidate.line_ids.clone(),
        net_balance: candidate.net_balance,
        created_at,
        origin: GroupOrigin::Automatic,
        algorithm_used: Some(candidate.algorithm),
        confidence_score: Some(candidate.confidence_score),
        generated_difference: false,
        difference_line_id: None,
    }
}
