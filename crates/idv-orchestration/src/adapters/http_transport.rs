//! HTTP callback transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::error::{OrchestrationError, Result};
use crate::ports::outbound::CallbackTransport;

/// POSTs callbacks with `reqwest`.
#[derive(Clone)]
pub struct HttpCallbackTransport {
    client: Client,
}

impl HttpCallbackTransport {
    /// Client with a per-request timeout.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| OrchestrationError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackTransport for HttpCallbackTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<u16> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| OrchestrationError::Transport(e.to_string()))?;
        let status = response.status();
        debug!(url, status = status.as_u16(), "Callback POST answered");
        Ok(status.as_u16())
    }
}
