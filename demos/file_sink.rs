//! Environment-driven configuration with a JSON file sink and an audit log
//! saved under the configured audit directory.
//!
//! ```bash
//! STAGECRAFT_MODE=DRY_RUN STAGECRAFT_ARTIFACT_DIR=/tmp/stagecraft \
//!     STAGECRAFT_AUDIT_DIR=/tmp/stagecraft/audit cargo run --example file_sink
//! ```

use serde_json::{json, Value};
use stagecraft::{handler_fn, Config, MemoryAuditLog, Pipeline, StageError};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn double(mut data: Value) -> Result<Value, StageError> {
    let n = data["n"]
        .as_i64()
        .ok_or_else(|| StageError::msg("missing field n"))?;
    data["n"] = json!(n * 2);
    Ok(data)
}

fn label(mut data: Value) -> Result<Value, StageError> {
    data["label"] = json!(format!("n={}", data["n"]));
    Ok(data)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    println!("Mode: {}", config.mode);
    println!("Artifact dir: {}", config.artifact_dir.display());
    println!("Audit dir: {}", config.audit_dir.display());

    let audit = Arc::new(MemoryAuditLog::new(config.mode.as_str()));
    let pipeline = Pipeline::<Value>::from_config("doubler", &config)
        .with_audit(audit.clone())
        .stage("double", handler_fn(double))
        .optional_stage("label", handler_fn(label));

    for n in [1, 21] {
        let result = pipeline.execute(json!({ "n": n })).await?;
        println!("{} -> {} ({})", n, result.output, result.status);
    }

    let missing = pipeline.execute(json!({})).await?;
    println!("{{}} -> {} ({})", missing.output, missing.status);

    // The sink overwrites, so only the last run is on disk
    let path = config.artifact_dir.join("doubler_result.json");
    println!("\nStored result:\n{}", tokio::fs::read_to_string(&path).await?);

    let audit_path = audit.save_in(&config.audit_dir).await?;
    println!("{} audit entries appended to {}", audit.len(), audit_path.display());

    Ok(())
}
