//! Vote ledger node binary
//!
//! Usage: `ledger-node [config.toml]`. Without a file, settings come from
//! `VOTE_LEDGER_*` environment variables. Set `VOTE_LEDGER_LOG_FORMAT=json`
//! for structured log lines.

use anyhow::Context;
use vote_ledger::{Config, Ledger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    if std::env::var("VOTE_LEDGER_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting vote ledger node");

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => Config::from_env().context("failed to load config from environment")?,
    };

    // Open ledger
    let ledger = Ledger::open(config).await.context("failed to open ledger")?;

    let public_key = ledger
        .public_key()
        .context("attestation key unavailable")?;
    tracing::info!(public_key = %hex::encode(public_key), "Attestation key ready");

    let integrity = ledger.verify_integrity().context("ledger integrity check failed")?;
    let results = ledger.get_results().context("failed to attest results")?;
    tracing::info!(
        leaf_count = integrity.leaf_count,
        merkle_root = %results.merkle_root,
        signature = %results.signature,
        counts = ?results.counts,
        "Ledger ready"
    );

    let mut updates = ledger.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            tracing::info!(
                candidate_id = %update.candidate_id,
                sequence = update.sequence,
                counts = ?update.counts,
                "Vote update"
            );
        }
    });

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down vote ledger node");
    ledger.shutdown().await?;
    watcher.abort();
    Ok(())
}
