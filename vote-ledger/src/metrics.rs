//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//! Collectors live in a registry owned by the [`Metrics`] value, so several
//! ledgers (or tests) in one process never collide on registration.
//!
//! # Metrics
//!
//! - `vote_ledger_votes_total` - Votes committed
//! - `vote_ledger_votes_rejected_total` - Submissions that failed
//! - `vote_ledger_anomalies_flagged_total` - Submissions flagged by the monitor
//! - `vote_ledger_commit_batch_size` - Histogram of group commit sizes
//! - `vote_ledger_commit_duration_seconds` - Histogram of durable write latencies
//! - `vote_ledger_leaves` - Current leaf count
//! - `vote_ledger_attestations_total` - Roots signed

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Votes committed
    pub votes_total: IntCounter,

    /// Failed submissions
    pub votes_rejected: IntCounter,

    /// Flagged submissions
    pub anomalies_flagged: IntCounter,

    /// Group commit size histogram
    pub batch_size: Histogram,

    /// Durable write duration histogram
    pub commit_duration: Histogram,

    /// Current leaf count
    pub leaves: IntGauge,

    /// Roots signed
    pub attestations_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let votes_total = IntCounter::new("vote_ledger_votes_total", "Votes committed")?;
        registry.register(Box::new(votes_total.clone()))?;

        let votes_rejected = IntCounter::new(
            "vote_ledger_votes_rejected_total",
            "Submissions that failed validation, storage or throttling",
        )?;
        registry.register(Box::new(votes_rejected.clone()))?;

        let anomalies_flagged = IntCounter::new(
            "vote_ledger_anomalies_flagged_total",
            "Submissions flagged by the anomaly monitor",
        )?;
        registry.register(Box::new(anomalies_flagged.clone()))?;

        let batch_size = Histogram::with_opts(
            HistogramOpts::new("vote_ledger_commit_batch_size", "Votes per group commit")
                .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]),
        )?;
        registry.register(Box::new(batch_size.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "vote_ledger_commit_duration_seconds",
                "Durable write latency",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        let leaves = IntGauge::new("vote_ledger_leaves", "Current leaf count")?;
        registry.register(Box::new(leaves.clone()))?;

        let attestations_total =
            IntCounter::new("vote_ledger_attestations_total", "Merkle roots signed")?;
        registry.register(Box::new(attestations_total.clone()))?;

        Ok(Self {
            votes_total,
            votes_rejected,
            anomalies_flagged,
            batch_size,
            commit_duration,
            leaves,
            attestations_total,
            registry,
        })
    }

    /// Record a durable group commit
    pub fn record_commit(&self, votes: usize, duration_seconds: f64, leaf_count: u64) {
        self.votes_total.inc_by(votes as u64);
        self.batch_size.observe(votes as f64);
        self.commit_duration.observe(duration_seconds);
        self.leaves.set(leaf_count as i64);
    }

    /// Record a failed submission
    pub fn record_rejection(&self) {
        self.votes_rejected.inc();
    }

    /// Record a flagged submission
    pub fn record_anomaly(&self) {
        self.anomalies_flagged.inc();
    }

    /// Record a signed root
    pub fn record_attestation(&self) {
        self.attestations_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
