//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_operations_total` - Committed money-movement operations
//! - `ledger_operations_failed_total` - Operations aborted before commit
//! - `ledger_post_commit_failures_total` - Recording failures after commit
//! - `ledger_commit_duration_seconds` - Histogram of commit latencies
//! - `rate_cache_hits_total` / `rate_cache_misses_total` - Rate cache traffic
//! - `rate_fallbacks_total` - Lookups served from the static table

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed operations
    pub operations_total: IntCounter,

    /// Operations aborted before commit
    pub operations_failed: IntCounter,

    /// Post-commit recording failures (transaction/instruction/audit)
    pub post_commit_failures: IntCounter,

    /// Commit latency histogram
    pub commit_duration: Histogram,

    /// Rate cache hits
    pub rate_cache_hits: IntCounter,

    /// Rate cache misses
    pub rate_cache_misses: IntCounter,

    /// Lookups that fell back to the static table
    pub rate_fallbacks: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounter::with_opts(Opts::new(
            "ledger_operations_total",
            "Committed money-movement operations",
        ))?;
        registry.register(Box::new(operations_total.clone()))?;

        let operations_failed = IntCounter::with_opts(Opts::new(
            "ledger_operations_failed_total",
            "Operations aborted before commit",
        ))?;
        registry.register(Box::new(operations_failed.clone()))?;

        let post_commit_failures = IntCounter::with_opts(Opts::new(
            "ledger_post_commit_failures_total",
            "Recording failures after a committed balance mutation",
        ))?;
        registry.register(Box::new(post_commit_failures.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_commit_duration_seconds",
                "Histogram of commit latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        let rate_cache_hits = IntCounter::with_opts(Opts::new(
            "rate_cache_hits_total",
            "FX rate lookups served from cache",
        ))?;
        registry.register(Box::new(rate_cache_hits.clone()))?;

        let rate_cache_misses = IntCounter::with_opts(Opts::new(
            "rate_cache_misses_total",
            "FX rate lookups that went to a source",
        ))?;
        registry.register(Box::new(rate_cache_misses.clone()))?;

        let rate_fallbacks = IntCounter::with_opts(Opts::new(
            "rate_fallbacks_total",
            "FX rate lookups served from the static fallback table",
        ))?;
        registry.register(Box::new(rate_fallbacks.clone()))?;

        Ok(Self {
            operations_total,
            operations_failed,
            post_commit_failures,
            commit_duration,
            rate_cache_hits,
            rate_cache_misses,
            rate_fallbacks,
            registry,
        })
    }

    /// Record a committed operation
    pub fn record_operation(&self) {
        self.operations_total.inc();
    }

    /// Record an aborted operation
    pub fn record_failure(&self) {
        self.operations_failed.inc();
    }

    /// Record a post-commit recording failure
    pub fn record_post_commit_failure(&self) {
        self.post_commit_failures.inc();
    }

    /// Record commit latency
    pub fn record_commit_duration(&self, seconds: f64) {
        self.commit_duration.observe(seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
