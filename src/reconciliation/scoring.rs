//! Confidence scoring
//!
//! Scores are pure functions of the matched lines and the strategy that
//! found them, so that repeated runs over the same lines agree.

use crate::amount::Amount;

pub const EXACT_PAIR_CONFIDENCE: u8 = 100;
pub const EXACT_REFERENCE_CONFIDENCE: u8 = 95;

const PROXIMITY_BASE: i64 = 80;
const PROXIMITY_CEILING: u8 = 89;

/// Subset-sum confidence: larger groups and larger residuals score lower
pub fn subset_confidence(group_size: usize, residual: Amount, tolerance: Amount) -> u8 {
    let size_penalty = 5 * (group_size.saturating_sub(1)) as i64;
    let residual_penalty = 10 * residual.abs().minor_units() / tolerance.minor_units().max(1);
    clamp_score(100 - size_penalty - residual_penalty.min(10), 1, 100)
}

/// Date-proximity confidence, always below the auto-commit threshold
///
/// `allowed` is the largest residual the pair could have had.
pub fn proximity_confidence(
    gap_days: i64,
    window_days: i64,
    residual: Amount,
    allowed: Amount,
    auto_commit_threshold: u8,
) -> u8 {
    let date_penalty = 20 * gap_days.abs() / window_days.max(1);
    let amount_penalty = 20 * residual.abs().minor_units() / allowed.minor_units().max(1);
    let ceiling = PROXIMITY_CEILING.min(auto_commit_threshold.saturating_sub(1));
    clamp_score(PROXIMITY_BASE - date_penalty - amount_penalty, 1, ceiling.max(1))
}

fn clamp_score(score: i64, min: u8, max: u8) -> u8 {
    score.clamp(i64::from(min), i64::from(max)) as u8
}
