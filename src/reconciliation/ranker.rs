//! Suggestion ranking for human review

use std::cmp::Ordering;

use crate::types::MatchSuggestion;

/// Orders suggestions for review
///
/// Highest confidence first, then smallest absolute residual, then earliest
/// entry date. Remaining ties are broken on the candidate line ids so the
/// order never depends on input order.
pub struct SuggestionRanker;

impl SuggestionRanker {
    pub fn rank(mut suggestions: Vec<MatchSuggestion>) -> Vec<MatchSuggestion> {
        suggestions.sort_by(Self::compare);
        suggestions
    }

    pub fn compare(a: &MatchSuggestion, b: &MatchSuggestion) -> Ordering {
        b.confidence_score
            .cmp(&a.confidence_score)
            .then_with(|| a.net_balance.abs().cmp(&b.net_balance.abs()))
            .then_with(|| a.earliest_entry_date.cmp(&b.earliest_entry_date))
            .then_with(|| a.candidate_line_ids.cmp(&b.candidate_line_ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::types::MatchAlgorithm;
    use chrono::NaiveDate;

    fn suggestion(ids: &[&str], confidence: u8, net: i64, day: u32) -> MatchSuggestion {
        MatchSuggestion {
            account_id: "411".to_string(),
            candidate_line_ids: ids.iter().map(|s| s.to_string()).collect(),
            confidence_score: confidence,
            net_balance: Amount::from_minor(net),
            algorithm: MatchAlgorithm::DateProximity,
            earliest_entry_date: NaiveDate::from_ymd_opt(2024, 2, day).unwrap(),
            rationale: String::new(),
        }
    }

    #[test]
    fn test_rank_order() {
        let ranked = SuggestionRanker::rank(vec![
            suggestion(&["a"], 60, 100, 1),
            suggestion(&["b"], 80, -500, 9),
            suggestion(&["c"], 60, -50, 5),
            suggestion(&["d"], 60, 50, 2),
            suggestion(&["e"], 80, 200, 3),
        ]);
        let order: Vec<&str> = ranked
            .iter()
            .map(|s| s.candidate_line_ids[0].as_str())
            .collect();
        assert_eq!(order, vec!["e", "b", "d", "c", "a"]);
    }

    #[test]
    fn test_rank_is_stable_across_input_order() {
        let items = vec![
            suggestion(&["x", "y"], 70, 10, 4),
            suggestion(&["p", "q"], 70, 10, 4),
            suggestion(&["m"], 90, 0, 1),
        ];
        let mut reversed = items.clone();
        reversed.reverse();
        assert_eq!(SuggestionRanker::rank(items), SuggestionRanker::rank(reversed));
    }
}
