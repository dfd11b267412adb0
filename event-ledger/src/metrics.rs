//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `ledger_events_total` - Events appended across all categories
//! - `ledger_write_errors_total` - Failed write attempts
//! - `ledger_flushes_total` - Flush operations
//! - `ledger_notifications_total` - Successful subscriber deliveries
//! - `ledger_subscriber_errors_total` - Failed subscriber callbacks
//! - `ledger_append_duration_seconds` - Histogram of append latencies
//!
//! Each instance carries its own registry so several managers can coexist
//! in one process (tests in particular).

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Total events appended
    pub events_total: IntCounter,

    /// Total failed writes
    pub write_errors_total: IntCounter,

    /// Total flushes
    pub flushes_total: IntCounter,

    /// Total successful subscriber deliveries
    pub notifications_total: IntCounter,

    /// Total subscriber callback failures
    pub subscriber_errors_total: IntCounter,

    /// Append latency histogram
    pub append_duration: Histogram,

    /// Prometheus registry
    registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let events_total =
            IntCounter::new("ledger_events_total", "Events appended across all categories")?;
        registry.register(Box::new(events_total.clone()))?;

        let write_errors_total =
            IntCounter::new("ledger_write_errors_total", "Failed write attempts")?;
        registry.register(Box::new(write_errors_total.clone()))?;

        let flushes_total = IntCounter::new("ledger_flushes_total", "Flush operations")?;
        registry.register(Box::new(flushes_total.clone()))?;

        let notifications_total = IntCounter::new(
            "ledger_notifications_total",
            "Successful subscriber deliveries",
        )?;
        registry.register(Box::new(notifications_total.clone()))?;

        let subscriber_errors_total = IntCounter::new(
            "ledger_subscriber_errors_total",
            "Failed subscriber callbacks",
        )?;
        registry.register(Box::new(subscriber_errors_total.clone()))?;

        let append_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_append_duration_seconds",
                "Histogram of append latencies",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250]),
        )?;
        registry.register(Box::new(append_duration.clone()))?;

        Ok(Self {
            events_total,
            write_errors_total,
            flushes_total,
            notifications_total,
            subscriber_errors_total,
            append_duration,
            registry,
        })
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("events_total", &self.events_total.get())
            .field("flushes_total", &self.flushes_total.get())
            .finish()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
