//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_entries_total` - Total number of ledger entries appended
//! - `ledger_units_committed_total` - Atomic units committed
//! - `ledger_units_rejected_total` - Atomic units rejected before commit
//! - `ledger_commit_duration_seconds` - Histogram of unit execution + commit latencies

use crate::storage::CommitSummary;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Total ledger entries appended
    pub entries_total: IntCounter,

    /// Units committed
    pub units_committed: IntCounter,

    /// Units rejected (validation or business failure)
    pub units_rejected: IntCounter,

    /// Unit duration histogram
    pub commit_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("entries_total", &self.entries_total.get())
            .field("units_committed", &self.units_committed.get())
            .field("units_rejected", &self.units_rejected.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entries_total = IntCounter::new(
            "ledger_entries_total",
            "Total number of ledger entries appended",
        )?;
        registry.register(Box::new(entries_total.clone()))?;

        let units_committed = IntCounter::new(
            "ledger_units_committed_total",
            "Atomic units committed",
        )?;
        registry.register(Box::new(units_committed.clone()))?;

        let units_rejected = IntCounter::new(
            "ledger_units_rejected_total",
            "Atomic units rejected before commit",
        )?;
        registry.register(Box::new(units_rejected.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_commit_duration_seconds",
                "Histogram of unit execution and commit latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            entries_total,
            units_committed,
            units_rejected,
            commit_duration,
            registry,
        })
    }

    /// Record a committed unit
    pub fn record_commit(&self, summary: &CommitSummary) {
        self.units_committed.inc();
        self.entries_total.inc_by(summary.entries as u64);
    }

    /// Record a rejected unit
    pub fn record_rejection(&self) {
        self.units_rejected.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render in the Prometheus text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
