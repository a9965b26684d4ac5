//! # busrpc Node
//!
//! Demo entry point. Configuration comes from `BUSRPC_*` variables.

use anyhow::{Context, Result};
use busrpc_core::RpcConfig;
use busrpc_node::DemoNode;
use busrpc_telemetry::{init_telemetry, TelemetryConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = init_telemetry(TelemetryConfig::for_service("busrpc-node"))
        .context("initializing telemetry")?;

    let config = RpcConfig::from_env().context("loading configuration")?;
    info!(
        broker = %config.broker_address,
        request_channel = %config.request_channel,
        "Configuration loaded"
    );

    let node = DemoNode::new(config)?;
    node.start().await?;

    let outcome = node.run_demo().await;
    match &outcome {
        Ok(report) => info!(
            echo = %String::from_utf8_lossy(&report.echo),
            stream = %String::from_utf8_lossy(&report.stream),
            "Demo exchange complete"
        ),
        Err(e) => error!(error = %format!("{e:#}"), "Demo exchange failed"),
    }

    let client_metrics = node.client().metrics().to_json()?;
    let server_metrics = node.server().metrics().to_json()?;
    info!(client = %client_metrics, server = %server_metrics, "Metrics snapshot");

    node.shutdown().await?;
    outcome.map(|_| ())
}
