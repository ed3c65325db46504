//! # Node Telemetry
//!
//! Logging and metrics for the IDV node.
//!
//! ## Components
//!
//! - **Tracing**: `tracing-subscriber` registry with `EnvFilter`, pretty or JSON output
//! - **Metrics**: Prometheus counters and gauges in a process-wide registry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use node_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! let _guard = init_telemetry(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `IDV_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `IDV_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |
//! | `IDV_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `IDV_SERVICE_NAME` | `idv-node` | Service name in logs |
//! | `IDV_NODE_ID` | (empty) | Node identity suffix |

mod config;
mod logging;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{
    encode_metrics, record_core_counters, register_metrics, MetricsHandle, COMPONENT_ERRORS,
    CORE_COUNTERS, EVENTS_ROUTED, LEDGER_HEIGHT, LEDGER_QUERY_DURATION, LEDGER_QUERY_TIMEOUTS,
    TRANSACTIONS_SUBMITTED,
};
pub use tracing_setup::init_tracing;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize tracing and register metrics.
///
/// Returns a guard that must be held for the lifetime of the application.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first (synchronous, no global subscriber needed)
    let metrics_handle = register_metrics()?;

    init_tracing(config)?;

    Ok(TelemetryGuard {
        _metrics: metrics_handle,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "idv-node");
    }

    #[test]
    fn test_metric_inc_macro() {
        metric_inc!(TRANSACTIONS_SUBMITTED);
        metric_inc!(COMPONENT_ERRORS, &["callback", "transport"]);
        assert!(TRANSACTIONS_SUBMITTED.get() >= 1);
    }
}
