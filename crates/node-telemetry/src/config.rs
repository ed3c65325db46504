//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and metrics.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Node identity this process runs as
    pub node_id: String,

    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Whether to enable console output
    pub console_output: bool,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "idv-node".to_string(),
            node_id: String::new(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `IDV_SERVICE_NAME`: Service name (default: idv-node)
    /// - `IDV_NODE_ID`: Node identity (default: empty)
    /// - `IDV_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `IDV_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `IDV_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("IDV_SERVICE_NAME").unwrap_or_else(|_| "idv-node".to_string()),

            node_id: env::var("IDV_NODE_ID").unwrap_or_default(),

            log_level: env::var("IDV_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("IDV_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: env::var("IDV_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),
        }
    }

    /// Service name including the node identity, when one is set.
    pub fn full_service_name(&self) -> String {
        if self.node_id.is_empty() {
            self.service_name.clone()
        } else {
            format!("{}-{}", self.service_name, self.node_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "idv-node");
        assert_eq!(config.log_level, "info");
        assert!(config.console_output);
    }

    #[test]
    fn test_full_service_name() {
        let mut config = TelemetryConfig::default();
        assert_eq!(config.full_service_name(), "idv-node");

        config.node_id = "idp1".to_string();
        assert_eq!(config.full_service_name(), "idv-node-idp1");
    }
}
