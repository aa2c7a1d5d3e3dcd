use anyhow::Result;
use chrono::NaiveDate;
use std::env;
use std::path::Path;

use recon_workbench::{
    group_by_status, BulkAction, BulkActionData, BulkCoordinator, ExceptionFilter,
    ExceptionStore, MatchResult, MatchStatus, PageRequest, RecordSnapshot, ReviewAction,
    SqliteExceptionStore, WorkflowEngine,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(),
        Some("demo") | None => run_demo(),
        Some(other) => {
            eprintln!("Unknown command: {other}");
            eprintln!("Usage: recon-workbench [init|demo]");
            std::process::exit(1);
        }
    }
}

fn db_path() -> String {
    env::var("RECON_DB").unwrap_or_else(|_| "exceptions.db".to_string())
}

fn run_init() -> Result<()> {
    println!("🗄️  Recon Workbench - Store Init");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let path = db_path();
    let store = SqliteExceptionStore::open(Path::new(&path))?;
    println!("✓ Exception store initialized with WAL mode: {path}");
    println!("✓ Current exception count: {}", store.count()?);

    Ok(())
}

/// End-to-end walkthrough against an in-memory store: classify a few
/// MatchResults, run transitions, a bulk resolve, and print the kanban view.
fn run_demo() -> Result<()> {
    println!("⚖️  Recon Workbench - Exception Workflow Demo");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let store = SqliteExceptionStore::open_in_memory()?;
    let engine = WorkflowEngine::new(store);

    // 1. Classify sample match results
    println!("\n📂 Classifying sample match results...");
    let amount_mismatch = engine.create_from_match(&sample_amount_mismatch())?;
    let missing = engine.create_from_match(&sample_missing_record())?;
    let duplicate = engine.create_from_match(&sample_duplicate())?;
    println!(
        "✓ Created {} / {} / {}",
        amount_mismatch.exception_type.as_str(),
        missing.exception_type.as_str(),
        duplicate.exception_type.as_str()
    );

    // 2. Walk one exception through the lifecycle
    println!("\n🔁 Running transitions...");
    engine.apply(
        &amount_mismatch.id,
        &ReviewAction::Assign {
            assignee: "reviewer1".to_string(),
        },
        "reviewer1",
    )?;
    engine.apply(&amount_mismatch.id, &ReviewAction::Escalate, "reviewer1")?;
    let resolved = engine.apply(
        &amount_mismatch.id,
        &ReviewAction::Accept {
            resolution: Some("Fee difference accepted".to_string()),
        },
        "supervisor",
    )?;
    println!(
        "✓ {} resolved with {} history entries",
        resolved.id,
        resolved.history.len()
    );

    // 3. Bulk resolve the rest
    println!("\n📦 Bulk resolving remaining exceptions...");
    let coordinator = BulkCoordinator::new(&engine);
    let report = coordinator.apply(
        &[missing.id.clone(), duplicate.id.clone()],
        BulkAction::Resolve,
        &BulkActionData {
            assigned_to: None,
            resolution: Some("Month-end close".to_string()),
        },
        "reviewer1",
    )?;
    println!(
        "✓ Bulk resolve: {} applied, {} skipped",
        report.applied_count, report.skipped_count
    );

    // 4. Kanban summary
    println!("\n📋 Kanban buckets:");
    let result = engine.query(&ExceptionFilter::new(), PageRequest::new(1, 50))?;
    for (status, items) in group_by_status(result.items) {
        println!("   {:18} {}", status.as_str(), items.len());
    }

    println!("\n✅ Demo complete");
    Ok(())
}

fn snapshot(system: &str, id: &str, amount: f64, day: u32) -> RecordSnapshot {
    RecordSnapshot {
        record_id: id.to_string(),
        source_system: system.to_string(),
        date: NaiveDate::from_ymd_opt(2025, 1, day).expect("valid demo date"),
        amount,
        currency: "USD".to_string(),
        reference: "INV-2025-001".to_string(),
        status: "posted".to_string(),
        description: "Invoice payment".to_string(),
    }
}

fn sample_amount_mismatch() -> MatchResult {
    MatchResult {
        status: MatchStatus::Partial,
        confidence: 0.82,
        source_record: Some(snapshot("ledger", "tx-1001", 5250.00, 15)),
        target_record: Some(snapshot("bank_statement", "stmt-88", 5200.00, 15)),
    }
}

fn sample_missing_record() -> MatchResult {
    MatchResult {
        status: MatchStatus::Exception,
        confidence: 0.91,
        source_record: Some(snapshot("ledger", "tx-1002", 310.25, 18)),
        target_record: None,
    }
}

fn sample_duplicate() -> MatchResult {
    MatchResult {
        status: MatchStatus::Partial,
        confidence: 0.88,
        source_record: Some(snapshot("ledger", "tx-1003", 99.00, 20)),
        target_record: Some(snapshot("ledger", "tx-1004", 99.00, 20)),
    }
}
