//! Prometheus metrics for the IDV node.
//!
//! All metrics follow the naming convention: `idv_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: events routed, ledger submissions, query timeouts
//! - **Gauge**: latest ledger height, mirrored core counters
//! - **Histogram**: ledger query round-trip time

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, Histogram, IntCounter, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // EVENT ROUTING
    // =========================================================================

    /// Events taken off the shared bus by the router
    pub static ref EVENTS_ROUTED: CounterVec = CounterVec::new(
        Opts::new("idv_router_events_total", "Events routed from the shared bus into the core"),
        &["event_type"]
    ).expect("metric creation failed");

    /// Errors by component and type
    pub static ref COMPONENT_ERRORS: CounterVec = CounterVec::new(
        Opts::new("idv_component_errors_total", "Errors by component and type"),
        &["component", "error_type"]
    ).expect("metric creation failed");

    // =========================================================================
    // LEDGER BRIDGE
    // =========================================================================

    /// Latest committed ledger height seen by this node
    pub static ref LEDGER_HEIGHT: IntGauge = IntGauge::new(
        "idv_ledger_latest_height",
        "Latest committed ledger height observed"
    ).expect("metric creation failed");

    /// Transactions handed to the ledger connector
    pub static ref TRANSACTIONS_SUBMITTED: IntCounter = IntCounter::new(
        "idv_ledger_transactions_submitted_total",
        "Transactions submitted to the ledger connector"
    ).expect("metric creation failed");

    /// Ledger queries that got no answer in time
    pub static ref LEDGER_QUERY_TIMEOUTS: IntCounter = IntCounter::new(
        "idv_ledger_query_timeouts_total",
        "Ledger queries that timed out"
    ).expect("metric creation failed");

    /// Ledger query round-trip time
    pub static ref LEDGER_QUERY_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "idv_ledger_query_duration_seconds",
            "Round-trip time of ledger queries"
        ).buckets(exponential_buckets(0.001, 2.0, 14).expect("bucket creation failed"))
    ).expect("metric creation failed");

    // =========================================================================
    // CORE COUNTERS
    // =========================================================================

    /// Snapshot of the orchestration core's internal counters
    pub static ref CORE_COUNTERS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("idv_core_counter", "Orchestration core counters, mirrored periodically"),
        &["counter"]
    ).expect("metric creation failed");
}

/// Handle to the registered metrics
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Routing
        Box::new(EVENTS_ROUTED.clone()),
        Box::new(COMPONENT_ERRORS.clone()),
        // Ledger
        Box::new(LEDGER_HEIGHT.clone()),
        Box::new(TRANSACTIONS_SUBMITTED.clone()),
        Box::new(LEDGER_QUERY_TIMEOUTS.clone()),
        Box::new(LEDGER_QUERY_DURATION.clone()),
        // Core
        Box::new(CORE_COUNTERS.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Copy a set of named core counters into `idv_core_counter`.
pub fn record_core_counters<'a>(counters: impl IntoIterator<Item = (&'a str, u64)>) {
    for (name, value) in counters {
        CORE_COUNTERS
            .with_label_values(&[name])
            .set(i64::try_from(value).unwrap_or(i64::MAX));
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
