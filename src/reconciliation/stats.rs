//! Reporting statistics derived from run metadata

use serde::{Deserialize, Serialize};

use crate::types::RunMetadata;

/// Aggregated figures over a set of automatic runs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReconciliationStatistics {
    pub runs: usize,
    pub lines_processed: usize,
    pub lines_auto_reconciled: usize,
    pub groups_formed: usize,
    pub suggestions: usize,
    /// Share of processed lines reconciled unattended, between 0 and 1
    pub automation_rate: f64,
    pub average_elapsed_millis: f64,
}

impl ReconciliationStatistics {
    pub fn from_runs(runs: &[RunMetadata]) -> Self {
        if runs.is_empty() {
            return Self::default();
        }

        let lines_processed: usize = runs.iter().map(|r| r.lines_processed).sum();
        let lines_auto_reconciled: usize = runs.iter().map(|r| r.lines_reconciled).sum();
        let total_millis: u64 = runs.iter().map(|r| r.elapsed_millis).sum();

        let automation_rate = if lines_processed > 0 {
            lines_auto_reconciled as f64 / lines_processed as f64
        } else {
            0.0
        };

        Self {
            runs: runs.len(),
            lines_processed,
            lines_auto_reconciled,
            groups_formed: runs.iter().map(|r| r.groups_formed).sum(),
            suggestions: runs.iter().map(|r| r.suggestions).sum(),
            automation_rate,
            average_elapsed_millis: total_millis as f64 / runs.len() as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(processed: usize, reconciled: usize, millis: u64) -> RunMetadata {
        RunMetadata {
            account_id: "411".to_string(),
            lines_processed: processed,
            lines_reconciled: reconciled,
            groups_formed: reconciled / 2,
            elapsed_millis: millis,
            ..RunMetadata::default()
        }
    }

    #[test]
    fn test_from_runs() {
        let stats = ReconciliationStatistics::from_runs(&[run(10, 6, 40), run(30, 14, 20)]);
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.lines_processed, 40);
        assert_eq!(stats.lines_auto_reconciled, 20);
        assert_eq!(stats.groups_formed, 10);
        assert!((stats.automation_rate - 0.5).abs() < f64::EPSILON);
        assert!((stats.average_elapsed_millis - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_no_runs() {
        let stats = ReconciliationStatistics::from_runs(&[]);
        assert_eq!(stats, ReconciliationStatistics::default());
    }
}
