//! Bounded subset-sum search
//!
//! Looks for groups of lines whose signed amounts cancel out within a
//! tolerance. Group sizes are explored smallest first across the whole
//! pool, anchors in pool order, and the last member of a candidate group is
//! found by a range lookup in an ordered amount index, so a group of size
//! `k` costs `O(n^(k-2) log n)` per anchor rather than `O(n^(k-1))`.

use std::collections::BTreeMap;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::amount::Amount;
use crate::reconciliation::config::SearchBudget;

const CHECK_INTERVAL: u64 = 1024;

/// Why a search stopped before exploring everything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchStop {
    BudgetExceeded { iterations: u64 },
    Cancelled,
}

pub(crate) struct SubsetSearch<'a> {
    amounts: &'a [Amount],
    open: Vec<bool>,
    /// Open positions keyed by signed amount, positions ascending
    index: BTreeMap<i64, Vec<usize>>,
    tolerance: i64,
    max_size: usize,
    budget: SearchBudget,
    iterations: u64,
    started: Instant,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> SubsetSearch<'a> {
    pub(crate) fn new(
        amounts: &'a [Amount],
        tolerance: Amount,
        max_size: usize,
        budget: SearchBudget,
        cancel: Option<&'a CancellationToken>,
    ) -> Self {
        let mut open = vec![false; amounts.len()];
        let mut index: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (pos, amount) in amounts.iter().enumerate() {
            // zero lines settle nothing
            if !amount.is_zero() {
                open[pos] = true;
                index.entry(amount.minor_units()).or_default().push(pos);
            }
        }

        Self {
            amounts,
            open,
            index,
            tolerance: tolerance.abs().minor_units(),
            max_size,
            budget,
            iterations: 0,
            started: Instant::now(),
            cancel,
        }
    }

    pub(crate) fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Run the search, handing each group found to `on_found`
    ///
    /// Groups already handed over stay valid when the search stops early.
    pub(crate) fn run<F>(&mut self, mut on_found: F) -> Result<(), SearchStop>
    where
        F: FnMut(&[usize]),
    {
        for size in 2..=self.max_size {
            for anchor in 0..self.amounts.len() {
                if !self.open[anchor] {
                    continue;
                }
                if let Some(members) = self.find(anchor, size)? {
                    self.claim(&members);
                    on_found(&members);
                }
            }
        }
        Ok(())
    }

    fn find(&mut self, anchor: usize, size: usize) -> Result<Option<Vec<usize>>, SearchStop> {
        let mut chosen = vec![anchor];
        self.extend(&mut chosen, anchor + 1, self.amounts[anchor].minor_units(), size)
    }

    fn extend(
        &mut self,
        chosen: &mut Vec<usize>,
        start: usize,
        sum: i64,
        size: usize,
    ) -> Result<Option<Vec<usize>>, SearchStop> {
        if chosen.len() + 1 == size {
            self.tick()?;
            return Ok(self.closing_member(chosen, start, sum).map(|last| {
                let mut members = chosen.clone();
                members.push(last);
                members
            }));
        }

        let mut last_failed: Option<i64> = None;
        for pos in start..self.amounts.len() {
            if !self.open[pos] {
                continue;
            }
            let amount = self.amounts[pos].minor_units();
            // a later line with the same amount has strictly fewer options
            if last_failed == Some(amount) {
                continue;
            }
            self.tick()?;

            chosen.push(pos);
            let found = self.extend(chosen, pos + 1, sum + amount, size)?;
            chosen.pop();

            if found.is_some() {
                return Ok(found);
            }
            last_failed = Some(amount);
        }
        Ok(None)
    }

    /// Best open line at or after `start` bringing `sum` within tolerance
    fn closing_member(&self, chosen: &[usize], start: usize, sum: i64) -> Option<usize> {
        let target = -sum;
        let has_debit = chosen.iter().any(|&p| self.amounts[p].is_positive());
        let has_credit = chosen.iter().any(|&p| self.amounts[p].is_negative());

        let mut best: Option<(i64, usize)> = None;
        for (&amount, positions) in self
            .index
            .range(target - self.tolerance..=target + self.tolerance)
        {
            // the finished group must hold both a debit and a credit
            if (amount > 0 && !has_credit) || (amount < 0 && !has_debit) {
                continue;
            }
            let Some(&pos) = positions.iter().find(|&&p| p >= start) else {
                continue;
            };
            let residual = (sum + amount).abs();
            if best.is_none_or(|(r, p)| (residual, pos) < (r, p)) {
                best = Some((residual, pos));
            }
        }
        best.map(|(_, pos)| pos)
    }

    fn claim(&mut self, members: &[usize]) {
        for &pos in members {
            self.open[pos] = false;
            let key = self.amounts[pos].minor_units();
            if let Some(positions) = self.index.get_mut(&key) {
                positions.retain(|&p| p != pos);
                if positions.is_empty() {
                    self.index.remove(&key);
                }
            }
        }
    }

    fn tick(&mut self) -> Result<(), SearchStop> {
        self.iterations += 1;
        if self.iterations > self.budget.max_iterations {
            return Err(SearchStop::BudgetExceeded {
                iterations: self.iterations - 1,
            });
        }
        if self.iterations % CHECK_INTERVAL == 0 {
            if self.cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(SearchStop::Cancelled);
            }
            if let Some(limit) = self.budget.max_duration() {
                if self.started.elapsed() > limit {
                    return Err(SearchStop::BudgetExceeded {
                        iterations: self.iterations,
                    });
                }
            }
        }
        Ok(())
    }
}
