//! Configuration for the orchestration core

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::RetryPolicy;
use crate::error::{OrchestrationError, Result};

/// Orchestration configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Callback delivery settings
    pub callback: CallbackConfig,
}

impl OrchestrationConfig {
    pub fn validate(&self) -> Result<()> {
        self.callback.validate()
    }
}

/// Callback delivery settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Timeout for a single HTTP attempt (milliseconds)
    pub request_timeout_ms: u64,
    /// Retry policy for domain event callbacks
    pub event_retry: RetryPolicy,
    /// Retry policy for error callbacks
    pub error_retry: RetryPolicy,
    /// Keep exhausted jobs in the store instead of deleting them
    pub keep_exhausted: bool,
    /// Persist jobs before the first attempt
    pub persist_jobs: bool,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            event_retry: RetryPolicy::default(),
            error_retry: RetryPolicy {
                max_attempts: 5,
                ..RetryPolicy::default()
            },
            keep_exhausted: false,
            persist_jobs: true,
        }
    }
}

impl CallbackConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(OrchestrationError::InvalidConfig(
                "callback request timeout must be positive".into(),
            ));
        }
        self.event_retry
            .validate()
            .map_err(|e| OrchestrationError::InvalidConfig(format!("event retry: {e}")))?;
        self.error_retry
            .validate()
            .map_err(|e| OrchestrationError::InvalidConfig(format!("error retry: {e}")))?;
        Ok(())
    }
}
