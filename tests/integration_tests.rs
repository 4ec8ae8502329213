//! Integration tests for lettrage-core

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use lettrage_core::{
    utils::MemoryStorage, Amount, CommitBatch, GroupOrigin, LedgerLine, LedgerLineRecord,
    LedgerLineRepository, MatchAlgorithm, PeriodFilter, ReconciliationConfig,
    ReconciliationError, ReconciliationGroup, ReconciliationResult, ReconciliationService,
    ReconciliationStatistics, ReconciliationWriter, RunOptions, StrategySelector,
    ToleranceThreshold,
};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const ACCOUNT: &str = "411C0042";

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

fn april(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, day).unwrap()
}

fn debit(id: &str, day: u32, amount: i64) -> LedgerLine {
    LedgerLine::debit(id, ACCOUNT, date(day), "", Amount::from_minor(amount))
}

fn credit(id: &str, day: u32, amount: i64) -> LedgerLine {
    LedgerLine::credit(id, ACCOUNT, date(day), "", Amount::from_minor(amount))
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn service(storage: &MemoryStorage) -> ReconciliationService<MemoryStorage, MemoryStorage> {
    ReconciliationService::new(storage.clone(), storage.clone())
}

fn manual_config() -> ReconciliationConfig {
    ReconciliationConfig::default().with_tolerance(ToleranceThreshold::new(
        Amount::from_minor(100),
        Amount::from_minor(1000),
    ))
}

#[tokio::test]
async fn test_no_commit_when_no_subset_balances() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![
            debit("l1", 1, 75000),
            credit("l2", 3, 60000),
            debit("l3", 5, 45000),
            credit("l4", 6, 5000),
            credit("l5", 8, 25000),
        ])
        .unwrap();
    let service = service(&storage);
    let config = ReconciliationConfig::default();

    let run = service
        .run_automatic_reconciliation(ACCOUNT, &StrategySelector::all(), &config)
        .await
        .unwrap();

    assert!(run.groups_committed.is_empty());
    assert!(!run.suggestions.is_empty());
    assert!(run
        .suggestions
        .iter()
        .all(|s| s.confidence_score < config.auto_commit_threshold));
    assert_eq!(run.stats.lines_processed, 5);
    assert_eq!(run.stats.groups_formed, 0);
    assert!(storage.groups_for_account(ACCOUNT).unwrap().is_empty());
}

#[tokio::test]
async fn test_late_credit_note_completes_subset() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![debit("inv", 1, 120000), credit("pay", 4, 105000)])
        .unwrap();
    let service = service(&storage);
    let config = ReconciliationConfig::default();

    let run = service
        .run_automatic_reconciliation(ACCOUNT, &StrategySelector::all(), &config)
        .await
        .unwrap();
    assert!(run.groups_committed.is_empty());

    storage.insert_line(credit("avoir", 9, 15000)).unwrap();
    let run = service
        .run_automatic_reconciliation(ACCOUNT, &StrategySelector::all(), &config)
        .await
        .unwrap();

    assert_eq!(run.groups_committed.len(), 1);
    let group = &run.groups_committed[0];
    assert_eq!(group.member_line_ids, ids(&["inv", "pay", "avoir"]));
    assert_eq!(group.origin, GroupOrigin::Automatic);
    assert_eq!(group.algorithm_used, Some(MatchAlgorithm::SubsetSum));
    assert_eq!(group.confidence_score, Some(90));
    assert!(group.net_balance.is_zero());

    for id in ["inv", "pay", "avoir"] {
        let line = storage.line(id).unwrap().unwrap();
        assert!(line.reconciled);
        assert_eq!(line.reconciliation_group_id.as_ref(), Some(&group.group_id));
    }
    assert_eq!(run.stats.lines_reconciled, 3);
}

#[tokio::test]
async fn test_manual_difference_entry() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![debit("inv", 2, 500000), credit("pay", 12, 499800)])
        .unwrap();
    let service =
        ReconciliationService::with_config(storage.clone(), storage.clone(), manual_config())
            .unwrap();

    let group = service
        .commit_manual_reconciliation(&ids(&["inv", "pay"]), true)
        .await
        .unwrap();

    assert_eq!(group.origin, GroupOrigin::Manual);
    assert!(group.generated_difference);
    assert!(group.net_balance.is_zero());
    assert_eq!(group.member_line_ids.len(), 3);

    let difference_id = group.difference_line_id.clone().unwrap();
    let difference = storage.line(&difference_id).unwrap().unwrap();
    assert_eq!(difference.signed_amount(), Amount::from_minor(-200));
    assert!(difference.generated_difference);
    assert!(difference.reconciled);
    assert_eq!(difference.entry_date, Utc::now().date_naive());
    assert!(difference.signed_amount().abs() <= Amount::from_minor(1000));
}

#[tokio::test]
async fn test_manual_residual_above_ceiling_fails() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![debit("inv", 2, 150000), credit("pay", 12, 100000)])
        .unwrap();
    let service =
        ReconciliationService::with_config(storage.clone(), storage.clone(), manual_config())
            .unwrap();

    let err = service
        .commit_manual_reconciliation(&ids(&["inv", "pay"]), true)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ReconciliationError::UnbalancedSelection {
            residual: Amount::from_minor(50000),
            ceiling: Amount::from_minor(1000),
            line_ids: ids(&["inv", "pay"]),
        }
    );
    assert_eq!(storage.lines_for_account(ACCOUNT).unwrap().len(), 2);
    assert!(storage.line("inv").unwrap().unwrap().is_open());
}

#[tokio::test]
async fn test_reverse_restores_lines_and_reverses_difference() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![debit("inv", 2, 500000), credit("pay", 12, 499800)])
        .unwrap();
    let before_inv = storage.line("inv").unwrap().unwrap();
    let before_pay = storage.line("pay").unwrap().unwrap();
    let service =
        ReconciliationService::with_config(storage.clone(), storage.clone(), manual_config())
            .unwrap();

    let group = service
        .commit_manual_reconciliation(&ids(&["inv", "pay"]), true)
        .await
        .unwrap();
    service.reverse_reconciliation(&group.group_id).await.unwrap();

    assert_eq!(storage.line("inv").unwrap().unwrap(), before_inv);
    assert_eq!(storage.line("pay").unwrap().unwrap(), before_pay);

    let difference = storage
        .line(group.difference_line_id.as_deref().unwrap())
        .unwrap()
        .expect("difference entry is kept");
    assert!(difference.reversed);
    assert!(!difference.reconciled);
    assert!(difference.reconciliation_group_id.is_none());

    // reversed entries are no longer offered for matching
    let open = storage.fetch_unreconciled_lines(ACCOUNT, None).await.unwrap();
    assert_eq!(open.len(), 2);

    let err = service
        .reverse_reconciliation(&group.group_id)
        .await
        .unwrap_err();
    assert_eq!(err, ReconciliationError::GroupNotFound(group.group_id));
}

#[tokio::test]
async fn test_reverse_unknown_group() {
    let storage = MemoryStorage::new();
    let err = service(&storage)
        .reverse_reconciliation("missing")
        .await
        .unwrap_err();
    assert_eq!(err, ReconciliationError::GroupNotFound("missing".to_string()));
}

#[tokio::test]
async fn test_manual_validation_errors() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![
            debit("a", 1, 1000),
            credit("b", 2, 1000),
            credit("c", 3, 1000),
            LedgerLine::credit("s", "401F0001", date(1), "", Amount::from_minor(1000)),
        ])
        .unwrap();
    let service = service(&storage);

    let err = service
        .commit_manual_reconciliation(&ids(&["a"]), false)
        .await
        .unwrap_err();
    assert_eq!(err, ReconciliationError::InsufficientSelection { selected: 1 });

    let err = service
        .commit_manual_reconciliation(&ids(&["a", "s"]), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::CrossAccountSelection { .. }));

    service
        .commit_manual_reconciliation(&ids(&["a", "b"]), false)
        .await
        .unwrap();
    let err = service
        .commit_manual_reconciliation(&ids(&["b", "c"]), false)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ReconciliationError::AlreadyReconciled {
            line_ids: ids(&["b"])
        }
    );
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_inverse_law_without_difference() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![debit("a", 1, 4200), credit("b", 2, 1200), credit("c", 3, 3000)])
        .unwrap();
    let snapshot = storage.lines_for_account(ACCOUNT).unwrap();
    let service = service(&storage);

    let group = service
        .commit_manual_reconciliation(&ids(&["a", "b", "c"]), false)
        .await
        .unwrap();
    assert!(!group.generated_difference);
    service.reverse_reconciliation(&group.group_id).await.unwrap();

    assert_eq!(storage.lines_for_account(ACCOUNT).unwrap(), snapshot);
}

#[tokio::test]
async fn test_automatic_run_is_idempotent() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![
            debit("f1", 1, 30000),
            credit("r1", 3, 30000),
            LedgerLine::debit("f2", ACCOUNT, date(4), "FAC-2024-0107", Amount::from_minor(88000)),
            LedgerLine::credit("r2", ACCOUNT, date(9), "VIR 2024 0107", Amount::from_minor(40000)),
            LedgerLine::credit("r3", ACCOUNT, date(19), "CHQ-2024-0107", Amount::from_minor(48000)),
            debit("f3", 10, 64000),
            credit("r4", 14, 63000),
        ])
        .unwrap();
    let service = service(&storage);
    let config = ReconciliationConfig::default();

    let first = service
        .run_automatic_reconciliation(ACCOUNT, &StrategySelector::all(), &config)
        .await
        .unwrap();
    let algorithms: Vec<_> = first
        .groups_committed
        .iter()
        .map(|g| g.algorithm_used)
        .collect();
    assert_eq!(
        algorithms,
        vec![
            Some(MatchAlgorithm::ExactPair),
            Some(MatchAlgorithm::ExactReference)
        ]
    );
    assert_eq!(first.suggestions.len(), 1);

    let second = service
        .run_automatic_reconciliation(ACCOUNT, &StrategySelector::all(), &config)
        .await
        .unwrap();
    assert!(second.groups_committed.is_empty());
    assert_eq!(second.suggestions, first.suggestions);
}

#[tokio::test]
async fn test_committed_groups_are_disjoint_and_balanced() {
    let storage = MemoryStorage::new();
    let mut lines = Vec::new();
    for i in 0..30u32 {
        let amount = 1000 + i64::from(i % 7) * 250;
        lines.push(debit(&format!("d{:02}", i), 1 + i % 28, amount));
        if i % 3 != 0 {
            lines.push(credit(&format!("c{:02}", i), 1 + (i + 2) % 28, amount));
        }
    }
    storage.insert_lines(lines).unwrap();
    let service = service(&storage);
    let config = ReconciliationConfig::default();

    service
        .run_automatic_reconciliation(ACCOUNT, &StrategySelector::all(), &config)
        .await
        .unwrap();

    let mut seen = HashSet::new();
    for group in storage.groups_for_account(ACCOUNT).unwrap() {
        assert!(group.net_balance.abs() <= config.tolerance.strict_tolerance);
        let members = service
            .compute_group_balance(&group.member_line_ids)
            .await
            .unwrap();
        assert_eq!(members, group.net_balance);
        for id in &group.member_line_ids {
            assert!(seen.insert(id.clone()), "line {} claimed twice", id);
        }
    }
    assert!(!seen.is_empty());
}

#[tokio::test]
async fn test_strategy_selection() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![debit("a", 1, 500), credit("b", 2, 500)])
        .unwrap();
    let service = service(&storage);
    let config = ReconciliationConfig::default();

    let run = service
        .run_automatic_reconciliation(
            ACCOUNT,
            &StrategySelector::only([MatchAlgorithm::ExactReference]),
            &config,
        )
        .await
        .unwrap();
    assert!(run.groups_committed.is_empty());
    assert_eq!(run.stats.strategies_run, vec![MatchAlgorithm::ExactReference]);

    let run = service
        .run_automatic_reconciliation(
            ACCOUNT,
            &StrategySelector::only([MatchAlgorithm::SubsetSum]),
            &config,
        )
        .await
        .unwrap();
    assert_eq!(run.groups_committed.len(), 1);
    assert_eq!(run.groups_committed[0].confidence_score, Some(95));
}

#[tokio::test]
async fn test_period_scoped_run() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![
            debit("jan", 1, 700),
            credit("jan-pay", 2, 700),
            LedgerLine::debit("apr", ACCOUNT, april(2), "", Amount::from_minor(900)),
            LedgerLine::credit("apr-pay", ACCOUNT, april(3), "", Amount::from_minor(900)),
        ])
        .unwrap();
    let service = service(&storage);
    let options = RunOptions {
        period: Some(PeriodFilter::between(date(1), date(31))),
        cancel: None,
    };

    let run = service
        .run_automatic_reconciliation_with(
            ACCOUNT,
            &StrategySelector::all(),
            &ReconciliationConfig::default(),
            &options,
        )
        .await
        .unwrap();

    assert_eq!(run.stats.lines_processed, 2);
    assert_eq!(run.groups_committed.len(), 1);
    assert!(storage.line("apr").unwrap().unwrap().is_open());
}

#[tokio::test]
async fn test_cancelled_run_commits_nothing() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![debit("a", 1, 500), credit("b", 2, 500)])
        .unwrap();
    let service = service(&storage);
    let token = CancellationToken::new();
    token.cancel();
    let options = RunOptions {
        period: None,
        cancel: Some(token),
    };

    let err = service
        .run_automatic_reconciliation_with(
            ACCOUNT,
            &StrategySelector::all(),
            &ReconciliationConfig::default(),
            &options,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ReconciliationError::Cancelled { .. }));
    assert!(storage.line("a").unwrap().unwrap().is_open());
}

#[tokio::test]
async fn test_compute_group_balance_preview() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![debit("a", 1, 500000), credit("b", 2, 499800)])
        .unwrap();
    let service = service(&storage);

    let balance = service
        .compute_group_balance(&ids(&["a", "b"]))
        .await
        .unwrap();
    assert_eq!(balance, Amount::from_minor(200));
    assert!(storage.line("a").unwrap().unwrap().is_open());

    let err = service
        .compute_group_balance(&ids(&["a", "nope"]))
        .await
        .unwrap_err();
    assert_eq!(err, ReconciliationError::UnknownLines { line_ids: ids(&["nope"]) });

    let empty = service.compute_group_balance(&[]).await.unwrap();
    assert_eq!(empty, Amount::ZERO);
}

#[tokio::test]
async fn test_oversized_amounts_are_rejected_at_the_boundary() {
    let storage = MemoryStorage::new();
    let err = storage
        .insert_line(debit("huge", 1, 5_000_000_000_000_000))
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::InvalidAmount(_)));

    let record = LedgerLineRecord {
        id: "huge".to_string(),
        account_id: ACCOUNT.to_string(),
        entry_date: date(1),
        piece_reference: String::new(),
        label: String::new(),
        debit_amount: bigdecimal::BigDecimal::from_str("50000000000000.00").unwrap(),
        credit_amount: bigdecimal::BigDecimal::from(0),
        third_party_code: None,
    };
    assert!(matches!(
        storage.insert_record(record, 2),
        Err(ReconciliationError::InvalidAmount(_))
    ));

    storage
        .insert_lines(vec![
            debit("inv", 1, 1_000_000_000_000_000),
            credit("pay", 3, 999_999_999_999_000),
        ])
        .unwrap();
    let run = service(&storage)
        .run_automatic_reconciliation(
            ACCOUNT,
            &StrategySelector::all(),
            &ReconciliationConfig::default(),
        )
        .await
        .unwrap();
    assert!(run.groups_committed.is_empty());
    assert_eq!(run.suggestions.len(), 1);
    assert_eq!(run.suggestions[0].net_balance, Amount::from_minor(1000));
}

#[tokio::test]
async fn test_fetch_suggestions_is_ranked_and_read_only() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![
            debit("a", 1, 10000),
            credit("b", 10, 9900),
            debit("c", 3, 5000),
            credit("d", 4, 5000),
        ])
        .unwrap();
    let service = service(&storage);

    let suggestions = service.fetch_suggestions(ACCOUNT).await.unwrap();
    assert_eq!(suggestions.len(), 2);
    assert_eq!(suggestions[0].candidate_line_ids, ids(&["c", "d"]));
    assert_eq!(suggestions[0].confidence_score, 100);
    assert_eq!(suggestions[1].algorithm, MatchAlgorithm::DateProximity);
    assert!(storage.groups_for_account(ACCOUNT).unwrap().is_empty());
}

#[tokio::test]
async fn test_account_statistics_and_run_statistics() {
    let storage = MemoryStorage::new();
    storage
        .insert_record(
            LedgerLineRecord {
                id: "inv".to_string(),
                account_id: ACCOUNT.to_string(),
                entry_date: date(1),
                piece_reference: "FAC-9".to_string(),
                label: "Invoice".to_string(),
                debit_amount: bigdecimal::BigDecimal::from_str("1250.50").unwrap(),
                credit_amount: bigdecimal::BigDecimal::from(0),
                third_party_code: None,
            },
            2,
        )
        .unwrap();
    storage.insert_lines(vec![credit("pay", 2, 125050), debit("open", 3, 900)]).unwrap();
    let service = service(&storage);

    let stats = service.fetch_account_statistics(ACCOUNT).await.unwrap();
    assert_eq!(stats.total_unreconciled, 3);
    assert_eq!(stats.unreconciled_amount, Amount::from_minor(900));

    let run = service
        .run_automatic_reconciliation(ACCOUNT, &StrategySelector::all(), service.config())
        .await
        .unwrap();
    let report = ReconciliationStatistics::from_runs(&[run.stats]);
    assert_eq!(report.lines_processed, 3);
    assert_eq!(report.lines_auto_reconciled, 2);
    assert!((report.automation_rate - 2.0 / 3.0).abs() < 1e-9);

    let stats = service.fetch_account_statistics(ACCOUNT).await.unwrap();
    assert_eq!(stats.total_unreconciled, 1);
}

/// Writer that lets another writer claim a line right before the first commit
struct RacingWriter {
    inner: MemoryStorage,
    commits: AtomicUsize,
}

#[async_trait]
impl ReconciliationWriter for RacingWriter {
    async fn commit_groups(&self, batch: &CommitBatch) -> ReconciliationResult<()> {
        if self.commits.fetch_add(1, Ordering::SeqCst) == 0 {
            let rival = ReconciliationGroup {
                group_id: "rival".to_string(),
                account_id: ACCOUNT.to_string(),
                member_line_ids: ids(&["a", "b"]),
                net_balance: Amount::ZERO,
                created_at: Utc::now().naive_utc(),
                origin: GroupOrigin::Manual,
                algorithm_used: None,
                confidence_score: None,
                generated_difference: false,
                difference_line_id: None,
            };
            self.inner
                .commit_groups(&CommitBatch {
                    account_id: ACCOUNT.to_string(),
                    groups: vec![rival],
                    difference_lines: Vec::new(),
                })
                .await?;
        }
        self.inner.commit_groups(batch).await
    }

    async fn release_group(&self, group: &ReconciliationGroup) -> ReconciliationResult<()> {
        self.inner.release_group(group).await
    }
}

#[tokio::test]
async fn test_concurrent_claim_triggers_fresh_snapshot_retry() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![
            debit("a", 1, 500),
            credit("b", 2, 500),
            debit("c", 3, 800),
            credit("d", 4, 800),
        ])
        .unwrap();
    let writer = RacingWriter {
        inner: storage.clone(),
        commits: AtomicUsize::new(0),
    };
    let service = ReconciliationService::new(storage.clone(), writer);

    let run = service
        .run_automatic_reconciliation(
            ACCOUNT,
            &StrategySelector::all(),
            &ReconciliationConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(run.stats.commit_attempts, 2);
    assert_eq!(run.groups_committed.len(), 1);
    assert_eq!(run.groups_committed[0].member_line_ids, ids(&["c", "d"]));
    assert_eq!(
        storage.line("a").unwrap().unwrap().reconciliation_group_id.as_deref(),
        Some("rival")
    );
}

#[tokio::test]
async fn test_persistent_conflict_is_surfaced() {
    let storage = MemoryStorage::new();
    storage
        .insert_lines(vec![debit("a", 1, 500), credit("b", 2, 500)])
        .unwrap();
    let writer = RacingWriter {
        inner: storage.clone(),
        commits: AtomicUsize::new(0),
    };
    let mut config = ReconciliationConfig::default();
    config.max_commit_retries = 0;
    let service = ReconciliationService::new(storage.clone(), writer);

    let err = service
        .run_automatic_reconciliation(ACCOUNT, &StrategySelector::all(), &config)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_parallel_runs_on_same_account_never_overlap() {
    let storage = MemoryStorage::new();
    let mut lines = Vec::new();
    for i in 0..20u32 {
        lines.push(debit(&format!("d{:02}", i), 1 + i, 1000 + i64::from(i)));
        lines.push(credit(&format!("c{:02}", i), 1 + i, 1000 + i64::from(i)));
    }
    storage.insert_lines(lines).unwrap();
    let service = Arc::new(service(&storage));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .run_automatic_reconciliation(
                        ACCOUNT,
                        &StrategySelector::all(),
                        &ReconciliationConfig::default(),
                    )
                    .await
            })
        })
        .collect();

    let mut committed = 0;
    for handle in handles {
        committed += handle.await.unwrap().unwrap().groups_committed.len();
    }
    assert_eq!(committed, 20);
    assert_eq!(storage.groups_for_account(ACCOUNT).unwrap().len(), 20);
}
