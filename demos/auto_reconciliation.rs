//! Automatic and manual reconciliation of a customer account

use chrono::NaiveDate;
use lettrage_core::utils::MemoryStorage;
use lettrage_core::{
    Amount, LedgerLine, ReconciliationConfig, ReconciliationService, ReconciliationStatistics,
    StrategySelector, ToleranceThreshold,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const ACCOUNT: &str = "411DUPONT";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn invoice(id: &str, d: u32, reference: &str, minor: i64) -> LedgerLine {
    LedgerLine::debit(id, ACCOUNT, day(d), reference, Amount::from_minor(minor))
}

fn payment(id: &str, d: u32, reference: &str, minor: i64) -> LedgerLine {
    LedgerLine::credit(id, ACCOUNT, day(d), reference, Amount::from_minor(minor))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let storage = MemoryStorage::new();
    storage.insert_lines(vec![
        invoice("inv-101", 1, "FAC-2024-101", 120000).with_label("Invoice 101"),
        payment("pay-101", 6, "VIR FAC 2024-101", 120000).with_label("Transfer"),
        invoice("inv-102", 3, "FAC-2024-102", 90000),
        payment("pay-102a", 9, "CHQ 2024-102", 40000),
        payment("pay-102b", 15, "CHQ 2024-102", 50000),
        invoice("inv-103", 10, "FAC-2024-103", 500000),
        payment("pay-103", 18, "VIR DUPONT", 499800),
    ])?;

    // LETTRAGE__AUTO_COMMIT_THRESHOLD and friends override the defaults
    let config = ReconciliationConfig::from_env()?.with_tolerance(ToleranceThreshold::new(
        Amount::ZERO,
        Amount::from_minor(1000),
    ));
    let service = ReconciliationService::with_config(storage.clone(), storage.clone(), config)?;

    println!("Automatic reconciliation of {}\n", ACCOUNT);
    let run = service
        .run_automatic_reconciliation(ACCOUNT, &StrategySelector::all(), service.config())
        .await?;

    for group in &run.groups_committed {
        println!(
            "  committed {:?} ({}%): {}",
            group.algorithm_used,
            group.confidence_score.unwrap_or_default(),
            group.member_line_ids.join(", ")
        );
    }
    for suggestion in &run.suggestions {
        println!(
            "  suggested {} ({}%): {} - {}",
            suggestion.algorithm,
            suggestion.confidence_score,
            suggestion.candidate_line_ids.join(", "),
            suggestion.rationale
        );
    }

    // the accountant accepts the proximity suggestion with a difference entry
    if let Some(suggestion) = run.suggestions.first() {
        let balance = service
            .compute_group_balance(&suggestion.candidate_line_ids)
            .await?;
        println!("\nSelection balance: {}", balance);

        let group = service
            .commit_manual_reconciliation(&suggestion.candidate_line_ids, true)
            .await?;
        println!(
            "Manual group {} committed, difference entry: {:?}",
            group.group_id, group.difference_line_id
        );
    }

    let stats = service.fetch_account_statistics(ACCOUNT).await?;
    println!(
        "\nOpen lines left: {} (balance {})",
        stats.total_unreconciled, stats.unreconciled_amount
    );

    let report = ReconciliationStatistics::from_runs(&[run.stats]);
    println!("Automation rate: {:.0}%", report.automation_rate * 100.0);

    Ok(())
}
