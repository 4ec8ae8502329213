//! Strategy selection for automatic runs

use serde::{Deserialize, Serialize};

use crate::types::MatchAlgorithm;

/// Ordered set of strategies to run
///
/// Strategies always execute in canonical order whatever order they were
/// given in, so that earlier strategies claim lines first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategySelector {
    strategies: Vec<MatchAlgorithm>,
}

impl StrategySelector {
    /// Every known strategy
    pub fn all() -> Self {
        Self {
            strategies: MatchAlgorithm::ORDERED.to_vec(),
        }
    }

    /// A named subset; duplicates are ignored
    pub fn only<I>(strategies: I) -> Self
    where
        I: IntoIterator<Item = MatchAlgorithm>,
    {
        let mut strategies: Vec<MatchAlgorithm> = strategies.into_iter().collect();
        strategies.sort();
        strategies.dedup();
        Self { strategies }
    }

    pub fn strategies(&self) -> &[MatchAlgorithm] {
        &self.strategies
    }

    pub fn contains(&self, algorithm: MatchAlgorithm) -> bool {
        self.strategies.contains(&algorithm)
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::all()
    }
}

/// Root of a piece reference used to group invoices with their payments
///
/// The digits of the reference when there are at least three of them
/// (`FAC-2024-0042` and `REG 2024/0042` share `20240042`), otherwise the
/// upper-cased alphanumeric characters. Blank references have no root.
pub fn reference_root(piece_reference: &str) -> Option<String> {
    let digits: String = piece_reference
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    if digits.len() >= 3 {
        return Some(digits);
    }

    let alnum: String = piece_reference
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect();
    if alnum.is_empty() {
        None
    } else {
        Some(alnum)
    }
}
