//! Automatic matching engine
//!
//! Runs the selected strategies over a snapshot of open lines and plans
//! candidate groups entirely in memory. Nothing is written here; the
//! service decides what to commit from the returned [`MatchPlan`].

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::amount::Amount;
use crate::reconciliation::balance::BalanceEvaluator;
use crate::reconciliation::config::ReconciliationConfig;
use crate::reconciliation::scoring::{
    proximity_confidence, subset_confidence, EXACT_PAIR_CONFIDENCE, EXACT_REFERENCE_CONFIDENCE,
};
use crate::reconciliation::strategy::{reference_root, StrategySelector};
use crate::reconciliation::subset::{SearchStop, SubsetSearch};
use crate::types::*;

/// A group proposed by one strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateGroup {
    pub account_id: String,
    /// Member lines in pool order
    pub line_ids: Vec<String>,
    pub net_balance: Amount,
    pub algorithm: MatchAlgorithm,
    pub confidence_score: u8,
    pub earliest_entry_date: NaiveDate,
    pub rationale: String,
    /// Whether the group passes the auto-commit rule
    pub auto_commit: bool,
}

impl CandidateGroup {
    pub fn to_suggestion(&self) -> MatchSuggestion {
        MatchSuggestion {
            account_id: self.account_id.clone(),
            candidate_line_ids: self.line_ids.clone(),
            confidence_score: self.confidence_score,
            net_balance: self.net_balance,
            algorithm: self.algorithm,
            earliest_entry_date: self.earliest_entry_date,
            rationale: self.rationale.clone(),
        }
    }
}

/// Result of planning one account
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchPlan {
    pub account_id: String,
    /// Candidate groups in the order they were found; pairwise disjoint
    pub candidates: Vec<CandidateGroup>,
    pub lines_processed: usize,
    pub strategies_run: Vec<MatchAlgorithm>,
    pub exhausted_strategies: Vec<MatchAlgorithm>,
    pub pool_truncated: bool,
}

impl MatchPlan {
    /// Groups to commit unattended
    pub fn auto_commit(&self) -> impl Iterator<Item = &CandidateGroup> {
        self.candidates.iter().filter(|c| c.auto_commit)
    }

    /// Groups left for human review
    pub fn suggestions(&self) -> Vec<MatchSuggestion> {
        self.candidates
            .iter()
            .filter(|c| !c.auto_commit)
            .map(CandidateGroup::to_suggestion)
            .collect()
    }

    /// Every candidate as a suggestion, committed or not
    pub fn all_suggestions(&self) -> Vec<MatchSuggestion> {
        self.candidates
            .iter()
            .map(CandidateGroup::to_suggestion)
            .collect()
    }
}

/// Open lines of one account in deterministic order, with claim marks
struct Pool<'a> {
    lines: Vec<&'a LedgerLine>,
    claimed: Vec<bool>,
}

impl<'a> Pool<'a> {
    fn new(account_id: &str, lines: &'a [LedgerLine]) -> Self {
        let mut pool: Vec<&LedgerLine> = lines
            .iter()
            .filter(|line| {
                line.account_id == account_id && line.is_open() && line.has_valid_amounts()
            })
            .collect();
        pool.sort_by(|a, b| (a.entry_date, &a.id).cmp(&(b.entry_date, &b.id)));
        pool.dedup_by(|a, b| a.id == b.id);

        let claimed = vec![false; pool.len()];
        Self {
            lines: pool,
            claimed,
        }
    }

    fn open_positions(&self) -> Vec<usize> {
        (0..self.lines.len()).filter(|&p| !self.claimed[p]).collect()
    }

    fn amount(&self, pos: usize) -> Amount {
        self.lines[pos].signed_amount()
    }
}

/// Stateless matching engine
pub struct MatchingEngine<'a> {
    config: &'a ReconciliationConfig,
}

impl<'a> MatchingEngine<'a> {
    pub fn new(config: &'a ReconciliationConfig) -> Self {
        Self { config }
    }

    /// Plan groups for one account
    ///
    /// Lines of other accounts and lines that are not open are ignored. The
    /// same lines and configuration always yield the same plan.
    pub fn plan(
        &self,
        account_id: &str,
        lines: &[LedgerLine],
        selector: &StrategySelector,
        cancel: Option<&CancellationToken>,
    ) -> ReconciliationResult<MatchPlan> {
        let foreign = lines.iter().filter(|l| l.account_id != account_id).count();
        if foreign > 0 {
            warn!(account_id, foreign, "ignoring lines from other accounts");
        }
        let out_of_range = lines
            .iter()
            .filter(|l| l.account_id == account_id && !l.has_valid_amounts())
            .count();
        if out_of_range > 0 {
            warn!(account_id, out_of_range, "ignoring lines with out-of-range amounts");
        }

        let mut pool = Pool::new(account_id, lines);
        let mut plan = MatchPlan {
            account_id: account_id.to_string(),
            lines_processed: pool.lines.len(),
            ..MatchPlan::default()
        };

        for &strategy in selector.strategies() {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(ReconciliationError::Cancelled {
                    account_id: account_id.to_string(),
                });
            }

            let before = plan.candidates.len();
            match strategy {
                MatchAlgorithm::ExactPair => self.exact_pairs(&mut pool, &mut plan),
                MatchAlgorithm::ExactReference => self.reference_matches(&mut pool, &mut plan),
                MatchAlgorithm::SubsetSum => {
                    if let Err(err) = self.subset_sums(&mut pool, &mut plan, cancel) {
                        match err {
                            ReconciliationError::SearchBudgetExceeded { iterations, .. } => {
                                warn!(account_id, iterations, "subset search budget exceeded");
                                plan.exhausted_strategies.push(strategy);
                            }
                            other => return Err(other),
                        }
                    }
                }
                MatchAlgorithm::DateProximity => self.date_proximity(&mut pool, &mut plan),
            }
            plan.strategies_run.push(strategy);

            debug!(
                account_id,
                strategy = %strategy,
                groups = plan.candidates.len() - before,
                "strategy finished"
            );
        }

        Ok(plan)
    }

    fn exact_pairs(&self, pool: &mut Pool<'_>, plan: &mut MatchPlan) {
        // absolute amount -> (waiting debits, waiting credits)
        let mut waiting: HashMap<i64, (VecDeque<usize>, VecDeque<usize>)> = HashMap::new();
        let mut pairs = Vec::new();

        for pos in pool.open_positions() {
            let amount = pool.amount(pos);
            if amount.is_zero() {
                continue;
            }
            let queues = waiting.entry(amount.abs().minor_units()).or_default();
            let (own, other) = if amount.is_positive() {
                (&mut queues.0, &mut queues.1)
            } else {
                (&mut queues.1, &mut queues.0)
            };
            match other.pop_front() {
                Some(partner) => pairs.push([partner, pos]),
                None => own.push_back(pos),
            }
        }

        for members in pairs {
            let rationale = format!(
                "{} and {} carry opposite amounts of {}",
                pool.lines[members[0]].id,
                pool.lines[members[1]].id,
                pool.amount(members[0]).abs()
            );
            self.push_candidate(
                pool,
                plan,
                &members,
                MatchAlgorithm::ExactPair,
                EXACT_PAIR_CONFIDENCE,
                rationale,
            );
        }
    }

    fn reference_matches(&self, pool: &mut Pool<'_>, plan: &mut MatchPlan) {
        let mut by_root: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for pos in pool.open_positions() {
            if let Some(root) = reference_root(&pool.lines[pos].piece_reference) {
                by_root.entry(root).or_default().push(pos);
            }
        }

        let tolerance = self.config.tolerance.strict_tolerance;
        for (root, members) in by_root {
            if members.len() < 2 {
                continue;
            }
            let has_debit = members.iter().any(|&p| pool.amount(p).is_positive());
            let has_credit = members.iter().any(|&p| pool.amount(p).is_negative());
            if !has_debit || !has_credit {
                continue;
            }

            let root_lines = members.iter().map(|&p| pool.lines[p]);
            let Ok(net) = BalanceEvaluator::evaluate(root_lines) else {
                continue;
            };
            if !BalanceEvaluator::is_balanced(net, tolerance) {
                continue;
            }

            let rationale = format!(
                "{} lines share reference {} and net to {}",
                members.len(),
                root,
                net
            );
            self.push_candidate(
                pool,
                plan,
                &members,
                MatchAlgorithm::ExactReference,
                EXACT_REFERENCE_CONFIDENCE,
                rationale,
            );
        }
    }

    fn subset_sums(
        &self,
        pool: &mut Pool<'_>,
        plan: &mut MatchPlan,
        cancel: Option<&CancellationToken>,
    ) -> ReconciliationResult<()> {
        let mut positions = pool.open_positions();
        if positions.len() > self.config.max_pool_size {
            plan.pool_truncated = true;
            positions.truncate(self.config.max_pool_size);
        }

        let amounts: Vec<Amount> = positions.iter().map(|&p| pool.amount(p)).collect();
        let tolerance = self.config.tolerance.strict_tolerance;
        let mut found: Vec<Vec<usize>> = Vec::new();

        let mut search = SubsetSearch::new(
            &amounts,
            tolerance,
            self.config.max_group_size,
            self.config.search_budget,
            cancel,
        );
        let outcome = search.run(|members| {
            found.push(members.iter().map(|&i| positions[i]).collect());
        });
        debug!(
            account_id = %plan.account_id,
            iterations = search.iterations(),
            groups = found.len(),
            "subset search stopped"
        );

        // groups found before a stop are still valid
        for members in found {
            let net: Amount = members.iter().map(|&p| pool.amount(p)).sum();
            let confidence = subset_confidence(members.len(), net, tolerance);
            let rationale = format!(
                "{} lines net to {} within tolerance {}",
                members.len(),
                net,
                tolerance
            );
            self.push_candidate(
                pool,
                plan,
                &members,
                MatchAlgorithm::SubsetSum,
                confidence,
                rationale,
            );
        }

        match outcome {
            Ok(()) => Ok(()),
            Err(SearchStop::BudgetExceeded { iterations }) => {
                Err(ReconciliationError::SearchBudgetExceeded {
                    strategy: MatchAlgorithm::SubsetSum,
                    iterations,
                })
            }
            Err(SearchStop::Cancelled) => Err(ReconciliationError::Cancelled {
                account_id: plan.account_id.clone(),
            }),
        }
    }

    fn date_proximity(&self, pool: &mut Pool<'_>, plan: &mut MatchPlan) {
        let window = self.config.date_window_days;

        for pos in 0..pool.lines.len() {
            if pool.claimed[pos] || pool.amount(pos).is_zero() {
                continue;
            }
            let Some((partner, confidence, gap)) = self.best_proximity_partner(pool, pos) else {
                continue;
            };

            let (first, second) = if partner < pos {
                (partner, pos)
            } else {
                (pos, partner)
            };
            let residual = pool.amount(first) + pool.amount(second);
            let rationale = format!(
                "{} and {} are {} days apart (window {}) with a residual of {}",
                pool.lines[first].id, pool.lines[second].id, gap, window, residual
            );
            self.push_candidate(
                pool,
                plan,
                &[first, second],
                MatchAlgorithm::DateProximity,
                confidence,
                rationale,
            );
        }
    }

    /// Highest scoring open counterpart of `pos` within the date window
    fn best_proximity_partner(&self, pool: &Pool<'_>, pos: usize) -> Option<(usize, u8, i64)> {
        let window = self.config.date_window_days;
        let amount = pool.amount(pos);
        let date = pool.lines[pos].entry_date;

        // pool is sorted by date, so the window is a contiguous range
        let lower = (0..pos)
            .rev()
            .take_while(|&p| (date - pool.lines[p].entry_date).num_days() <= window)
            .last()
            .unwrap_or(pos);
        let upper = (pos + 1..pool.lines.len())
            .take_while(|&p| (pool.lines[p].entry_date - date).num_days() <= window)
            .last()
            .unwrap_or(pos);

        let mut best: Option<(u8, i64, usize, i64)> = None;
        for other in lower..=upper {
            if other == pos || pool.claimed[other] {
                continue;
            }
            let other_amount = pool.amount(other);
            if other_amount.is_zero() || other_amount.is_positive() == amount.is_positive() {
                continue;
            }

            let larger = amount.abs().max(other_amount.abs());
            let allowed = proximity_allowance(larger, self.config.proximity_ratio_bps);
            let residual = (amount + other_amount).abs();
            if residual > allowed {
                continue;
            }

            let gap = (pool.lines[other].entry_date - date).num_days().abs();
            let confidence = proximity_confidence(
                gap,
                window,
                residual,
                allowed,
                self.config.auto_commit_threshold,
            );
            let key = (confidence, residual.minor_units(), other, gap);
            let better = match best {
                None => true,
                Some((c, r, o, _)) => {
                    confidence > c || (confidence == c && (key.1, key.2) < (r, o))
                }
            };
            if better {
                best = Some(key);
            }
        }

        best.map(|(confidence, _, other, gap)| (other, confidence, gap))
    }

    fn push_candidate(
        &self,
        pool: &mut Pool<'_>,
        plan: &mut MatchPlan,
        members: &[usize],
        algorithm: MatchAlgorithm,
        confidence_score: u8,
        rationale: String,
    ) {
        let mut members = members.to_vec();
        members.sort_unstable();

        // every strategy has already bounded this sum
        let net_balance: Amount = members.iter().map(|&p| pool.amount(p)).sum();
        let auto_commit = algorithm != MatchAlgorithm::DateProximity
            && confidence_score >= self.config.auto_commit_threshold
            && BalanceEvaluator::is_balanced(net_balance, self.config.tolerance.strict_tolerance);
        let earliest_entry_date = members
            .iter()
            .map(|&p| pool.lines[p].entry_date)
            .min()
            .unwrap_or(NaiveDate::MIN);

        for &p in &members {
            pool.claimed[p] = true;
        }

        plan.candidates.push(CandidateGroup {
            account_id: plan.account_id.clone(),
            line_ids: members.iter().map(|&p| pool.lines[p].id.clone()).collect(),
            net_balance,
            algorithm,
            confidence_score,
            earliest_entry_date,
            rationale,
            auto_commit,
        });
    }
}

/// Largest residual a proximity pair may carry, in basis points of `larger`
fn proximity_allowance(larger: Amount, ratio_bps: u32) -> Amount {
    let allowed = i128::from(larger.minor_units()) * i128::from(ratio_bps) / 10_000;
    Amount::from_minor(i64::try_from(allowed).unwrap_or(i64::MAX))
}
