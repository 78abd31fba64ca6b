//! Record normalization pipeline with audit logging.
//!
//! This demo shows:
//! - Stages written as `StageHandler` structs and as plain closures
//! - Required, optional and retried stages
//! - Collecting audit events in a `MemoryAuditLog` and saving them as JSON lines
//!
//! Run with `RUST_LOG=stagecraft=debug cargo run --example records` to see
//! per-stage logging.

use async_trait::async_trait;
use serde::Serialize;
use stagecraft::{
    handler_fn, AuditAction, AuditQuery, MemoryAuditLog, Pipeline, StageError, StageHandler,
    StageOptions,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Serialize)]
struct Record {
    owner: String,
    address: String,
    amount: String,
}

#[derive(Clone, Debug, Default, Serialize)]
struct Batch {
    records: Vec<Record>,
    total_cents: u64,
    flagged: Vec<String>,
}

/// Trims and uppercases owner names and addresses.
struct NormalizeRecords;

#[async_trait]
impl StageHandler<Batch> for NormalizeRecords {
    async fn transform(&self, mut batch: Batch) -> Result<Batch, StageError> {
        if batch.records.is_empty() {
            return Err(StageError::msg("batch has no records"));
        }
        for record in &mut batch.records {
            record.owner = record.owner.trim().to_uppercase();
            record.address = record.address.split_whitespace().collect::<Vec<_>>().join(" ");
        }
        Ok(batch)
    }
}

/// Sums record amounts, failing on the first unparseable one.
struct EstimateTotal;

#[async_trait]
impl StageHandler<Batch> for EstimateTotal {
    async fn transform(&self, mut batch: Batch) -> Result<Batch, StageError> {
        let mut total = 0u64;
        for record in &batch.records {
            total += parse_cents(&record.amount).ok_or_else(|| {
                StageError::msg(format!("invalid amount {:?} for {}", record.amount, record.owner))
            })?;
        }
        batch.total_cents = total;
        Ok(batch)
    }
}

/// Lookup service that is unavailable for its first call.
struct OwnerLookup {
    calls: AtomicU32,
}

#[async_trait]
impl StageHandler<Batch> for OwnerLookup {
    async fn transform(&self, mut batch: Batch) -> Result<Batch, StageError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(StageError::msg("lookup service unavailable"));
        }
        batch.flagged = batch
            .records
            .iter()
            .filter(|r| r.owner.contains("ESTATE"))
            .map(|r| r.owner.clone())
            .collect();
        Ok(batch)
    }
}

fn parse_cents(amount: &str) -> Option<u64> {
    let cleaned: String = amount.chars().filter(|c| *c != '$' && *c != ',').collect();
    let (dollars, cents) = match cleaned.split_once('.') {
        Some((d, c)) => (d, c),
        None => (cleaned.as_str(), "0"),
    };
    let cents = match cents.len() {
        1 => cents.parse::<u64>().ok()? * 10,
        2 => cents.parse::<u64>().ok()?,
        _ => return None,
    };
    Some(dollars.parse::<u64>().ok()? * 100 + cents)
}

fn record(owner: &str, address: &str, amount: &str) -> Record {
    Record {
        owner: owner.to_string(),
        address: address.to_string(),
        amount: amount.to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let audit = Arc::new(MemoryAuditLog::new("TEST"));

    let pipeline = Pipeline::new("records")
        .with_audit(audit.clone())
        .add_stage(
            "normalize",
            NormalizeRecords,
            StageOptions::new().desc("Clean owner and address fields"),
        )?
        .add_stage(
            "owner_lookup",
            OwnerLookup {
                calls: AtomicU32::new(0),
            },
            StageOptions::new().retry(2).tag("service", "lookup"),
        )?
        .add_stage(
            "enrich",
            handler_fn(|_: Batch| Err(StageError::msg("enrichment source offline"))),
            StageOptions::new().optional(),
        )?
        .add_stage("estimate", EstimateTotal, StageOptions::new())?;

    println!("Pipeline graph:");
    println!("{}", serde_json::to_string_pretty(&pipeline.to_graph())?);

    let batch = Batch {
        records: vec![
            record("  jane doe ", "123  Main St,   Springfield", "$1,250.50"),
            record("estate of john roe", "9 Elm   Ave", "$800"),
        ],
        ..Batch::default()
    };

    let result = pipeline.execute(batch).await?;

    println!("\nStatus: {}", result.status);
    for stage in &result.stage_results {
        println!(
            "  {:<14} {:<6} attempts={} {}",
            stage.stage_name,
            stage.status,
            stage.attempts,
            stage.error.as_deref().unwrap_or("")
        );
    }
    println!("Total: {} cents", result.output.total_cents);
    println!("Flagged: {:?}", result.output.flagged);

    let stage_events = audit.query(&AuditQuery::new().action(AuditAction::StageExecute));
    println!("\n{} audit entries, {} stage events", audit.len(), stage_events.len());

    let dir = tempfile::tempdir()?;
    let path = audit.save_in(dir.path()).await?;
    let reloaded = MemoryAuditLog::load_from_file(&path).await?;
    println!("Saved and reloaded {} entries from {}", reloaded.len(), path.display());

    Ok(())
}
