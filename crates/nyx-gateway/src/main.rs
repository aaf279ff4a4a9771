//! Gateway client entry point
//!
//! Run with:
//! ```bash
//! NYX_TOKEN=... cargo run -p nyx-gateway
//! ```
//!
//! Configuration is loaded from environment variables. Events are logged
//! until Ctrl-C.

use anyhow::Context;
use nyx_common::{try_init_tracing_with_config, GatewayConfig, TracingConfig};
use nyx_gateway::protocol::CLOSE_NORMAL;
use nyx_gateway::{Gateway, GatewayEvent, GatewayOptions, HttpMetadataProvider};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Gateway client failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("Failed to load configuration")?;

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        app = %config.app.name,
        env = ?config.app.env,
        encoding = %config.encoding,
        compression = ?config.compression,
        "Configuration loaded"
    );

    let options = GatewayOptions::from_config(&config)?;
    let provider = HttpMetadataProvider::new(&config.api_url, options.normalized_token())?;
    let (gateway, mut events) = Gateway::new(options, Arc::new(provider))?;
    let gateway = Arc::new(gateway);

    let logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    gateway.connect().await.context("Failed to connect")?;
    info!(shards = gateway.shard_count(), "Gateway running");

    let result = run_until(&gateway, tokio::signal::ctrl_c()).await;
    drop(gateway);
    let _ = logger.await;
    result
}

/// Run until a shard fails or `shutdown` resolves, then destroy the gateway
async fn run_until<F>(gateway: &Gateway, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    let result = tokio::select! {
        biased;
        signal = shutdown => {
            info!("Shutting down");
            signal.context("Failed to listen for Ctrl-C")
        }
        result = gateway.wait() => result.context("Shard stopped"),
    };

    gateway.destroy(CLOSE_NORMAL).await;
    result
}

fn log_event(event: &GatewayEvent) {
    let shard_id = event.shard_id();
    match event {
        GatewayEvent::Dispatch {
            event, sequence, ..
        } => debug!(?shard_id, event = %event, ?sequence, "Dispatch"),
        GatewayEvent::HeartbeatSent { .. } | GatewayEvent::Debug { .. } => {
            debug!(?shard_id, "{event}");
        }
        GatewayEvent::Warn { .. }
        | GatewayEvent::HeartbeatTimeout { .. }
        | GatewayEvent::SessionInvalid { .. } => warn!(?shard_id, "{event}"),
        GatewayEvent::Error { .. } => error!(?shard_id, "{event}"),
        _ => info!(?shard_id, kind = event.name(), "{event}"),
    }
}
