//! # IDV Node
//!
//! Entry point of an identity-verification node. Runs the orchestration
//! core of one node identity (or, as a proxy, of several) on a shared bus
//! that the message bus and ledger connectors publish to.
//!
//! Configuration comes from `IDV_*` environment variables; see
//! `container/config.rs` for the full list.

use std::sync::Arc;

use anyhow::{Context, Result};
use node_runtime::{NodeConfig, NodeRuntime};
use node_telemetry::{init_telemetry, TelemetryConfig};
use shared_bus::InMemoryEventBus;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    let _telemetry_guard = init_telemetry(&telemetry).context("Failed to initialize telemetry")?;

    let config = NodeConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let bus = Arc::new(InMemoryEventBus::with_capacity(config.runtime.bus_capacity));
    let runtime = NodeRuntime::new(config, bus)?;
    runtime.start().await?;

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    // A second Ctrl+C skips the graceful path
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt, exiting immediately");
            std::process::exit(130);
        }
    });

    runtime.shutdown().await;
    Ok(())
}
