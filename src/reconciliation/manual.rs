//! Manual reconciliation validation
//!
//! Checks a user selection and turns it into a group ready to commit,
//! generating a difference entry when the residual is small enough.

use chrono::NaiveDateTime;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::amount::Amount;
use crate::reconciliation::balance::{BalanceEvaluator, BalanceVerdict, ToleranceThreshold};
use crate::types::*;

pub const DIFFERENCE_LABEL: &str = "Reconciliation difference";

/// A validated selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualPlan {
    pub group: ReconciliationGroup,
    /// Generated difference entry, already stamped with the group
    pub difference_line: Option<LedgerLine>,
}

impl ManualPlan {
    pub fn into_batch(self) -> CommitBatch {
        CommitBatch {
            account_id: self.group.account_id.clone(),
            groups: vec![self.group],
            difference_lines: self.difference_line.into_iter().collect(),
        }
    }
}

pub struct ManualReconciliationValidator {
    tolerance: ToleranceThreshold,
}

impl ManualReconciliationValidator {
    pub fn new(tolerance: ToleranceThreshold) -> Self {
        Self { tolerance }
    }

    /// Validate a selection against the fetched lines
    ///
    /// `lines` may contain more lines than selected; only the selected ids
    /// are considered. Duplicate ids count once.
    pub fn validate(
        &self,
        line_ids: &[String],
        lines: &[LedgerLine],
        allow_difference: bool,
        now: NaiveDateTime,
    ) -> ReconciliationResult<ManualPlan> {
        let selected: BTreeSet<&str> = line_ids.iter().map(String::as_str).collect();
        if selected.len() < 2 {
            return Err(ReconciliationError::InsufficientSelection {
                selected: selected.len(),
            });
        }

        let by_id: HashMap<&str, &LedgerLine> =
            lines.iter().map(|line| (line.id.as_str(), line)).collect();
        let unknown: Vec<String> = selected
            .iter()
            .filter(|id| !by_id.contains_key(*id))
            .map(|id| id.to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(ReconciliationError::UnknownLines { line_ids: unknown });
        }
        let members: Vec<&LedgerLine> = selected.iter().map(|id| by_id[id]).collect();

        let accounts: BTreeSet<&str> = members.iter().map(|l| l.account_id.as_str()).collect();
        if accounts.len() > 1 {
            return Err(ReconciliationError::CrossAccountSelection {
                account_ids: accounts.into_iter().map(str::to_string).collect(),
            });
        }

        let reversed = ids_where(&members, |l| l.reversed);
        if !reversed.is_empty() {
            return Err(ReconciliationError::ReversedLines { line_ids: reversed });
        }

        let reconciled = ids_where(&members, |l| {
            l.reconciled || l.reconciliation_group_id.is_some()
        });
        if !reconciled.is_empty() {
            return Err(ReconciliationError::AlreadyReconciled {
                line_ids: reconciled,
            });
        }

        let account_id = members[0].account_id.clone();
        let member_ids: Vec<String> = members.iter().map(|l| l.id.clone()).collect();
        let net = BalanceEvaluator::evaluate(members.iter().copied())?;
        let group_id = Uuid::new_v4().to_string();

        let difference_line = match self.tolerance.classify(net) {
            BalanceVerdict::Balanced => None,
            BalanceVerdict::NeedsDifference(residual) if allow_difference => Some(
                difference_entry(&group_id, &account_id, residual, now),
            ),
            BalanceVerdict::NeedsDifference(residual) | BalanceVerdict::Unbalanced(residual) => {
                return Err(ReconciliationError::UnbalancedSelection {
                    residual,
                    ceiling: self.tolerance.difference_ceiling,
                    line_ids: member_ids,
                });
            }
        };

        let mut member_line_ids = member_ids;
        let mut net_balance = net;
        if let Some(line) = &difference_line {
            member_line_ids.push(line.id.clone());
            net_balance += line.signed_amount();
        }

        let group = ReconciliationGroup {
            group_id,
            account_id,
            member_line_ids,
            net_balance,
            created_at: now,
            origin: GroupOrigin::Manual,
            algorithm_used: None,
            confidence_score: None,
            generated_difference: difference_line.is_some(),
            difference_line_id: difference_line.as_ref().map(|l| l.id.clone()),
        };

        Ok(ManualPlan {
            group,
            difference_line,
        })
    }
}

/// Line cancelling `residual`, dated on the day of `now`
fn difference_entry(
    group_id: &str,
    account_id: &str,
    residual: Amount,
    now: NaiveDateTime,
) -> LedgerLine {
    let (debit, credit) = if residual.is_positive() {
        (Amount::ZERO, residual)
    } else {
        (residual.abs(), Amount::ZERO)
    };

    let mut line = LedgerLine::new(
        Uuid::new_v4().to_string(),
        account_id.to_string(),
        now.date(),
        format!("DIFF-{}", group_id),
        DIFFERENCE_LABEL.to_string(),
        debit,
        credit,
    );
    line.generated_difference = true;
    line.reconciled = true;
    line.reconciliation_group_id = Some(group_id.to_string());
    line
}

fn ids_where<F>(lines: &[&LedgerLine], predicate: F) -> Vec<String>
where
    F: Fn(&LedgerLine) -> bool,
{
    lines
        .iter()
        .filter(|l| predicate(l))
        .map(|l| l.id.clone())
        .collect()
}
