//! Balance evaluation and tolerance handling

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::types::{LedgerLine, ReconciliationError, ReconciliationResult};

/// Residual thresholds for a group to be considered settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceThreshold {
    /// Largest absolute residual accepted without a difference entry
    pub strict_tolerance: Amount,
    /// Largest absolute residual a generated difference entry may absorb
    pub difference_ceiling: Amount,
}

impl Default for ToleranceThreshold {
    fn default() -> Self {
        Self {
            strict_tolerance: Amount::ZERO,
            difference_ceiling: Amount::from_minor(1000),
        }
    }
}

/// Where a residual falls relative to a [`ToleranceThreshold`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceVerdict {
    /// Settled as is
    Balanced,
    /// Settles with a difference entry of the opposite sign
    NeedsDifference(Amount),
    /// Beyond the difference ceiling
    Unbalanced(Amount),
}

impl ToleranceThreshold {
    pub fn new(strict_tolerance: Amount, difference_ceiling: Amount) -> Self {
        Self {
            strict_tolerance,
            difference_ceiling,
        }
    }

    pub fn classify(&self, net_balance: Amount) -> BalanceVerdict {
        let residual = net_balance.abs();
        if residual <= self.strict_tolerance {
            BalanceVerdict::Balanced
        } else if residual <= self.difference_ceiling {
            BalanceVerdict::NeedsDifference(net_balance)
        } else {
            BalanceVerdict::Unbalanced(net_balance)
        }
    }
}

/// Stateless balance computations over ledger lines
pub struct BalanceEvaluator;

impl BalanceEvaluator {
    /// Net balance of a set of lines: total debits minus total credits
    ///
    /// Fails with [`ReconciliationError::InvalidAmount`] if a line carries an
    /// out-of-range amount or the sum leaves the `i64` range.
    pub fn evaluate<'a, I>(lines: I) -> ReconciliationResult<Amount>
    where
        I: IntoIterator<Item = &'a LedgerLine>,
    {
        lines.into_iter().try_fold(Amount::ZERO, |net, line| {
            checked_line(line)?;
            net.checked_add(line.signed_amount())
                .ok_or_else(|| overflow("net balance"))
        })
    }

    /// Whether a residual is within tolerance
    pub fn is_balanced(net_balance: Amount, tolerance: Amount) -> bool {
        net_balance.abs() <= tolerance
    }

    /// Total debits and total credits of a set of lines
    pub fn totals<'a, I>(lines: I) -> ReconciliationResult<(Amount, Amount)>
    where
        I: IntoIterator<Item = &'a LedgerLine>,
    {
        lines
            .into_iter()
            .try_fold((Amount::ZERO, Amount::ZERO), |(debit, credit), line| {
                checked_line(line)?;
                let debit = debit
                    .checked_add(line.debit_amount)
                    .ok_or_else(|| overflow("debit total"))?;
                let credit = credit
                    .checked_add(line.credit_amount)
                    .ok_or_else(|| overflow("credit total"))?;
                Ok((debit, credit))
            })
    }
}

fn checked_line(line: &LedgerLine) -> ReconciliationResult<()> {
    if line.has_valid_amounts() {
        Ok(())
    } else {
        Err(ReconciliationError::InvalidAmount(format!(
            "line '{}' carries an out-of-range amount",
            line.id
        )))
    }
}

fn overflow(what: &str) -> ReconciliationError {
    ReconciliationError::InvalidAmount(format!("{} overflows", what))
}
