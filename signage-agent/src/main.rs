//! Signage Agent - headless player binary
//!
//! Usage:
//! - `signage-agent`: pair if needed, then play the assigned channel
//! - `signage-agent unpair`: forget the stored device identity and exit

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use signage_agent::config::AgentConfig;
use signage_agent::device::DeviceInfo;
use signage_agent::player::{log_screen_events, PlayerRuntime};
use signage_agent::render::LoggingSink;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("signage_agent=info")),
        )
        .init();

    info!("Signage Agent v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::load().await.context("Failed to load configuration")?;
    let device = DeviceInfo::discover();

    let (runtime, events) = PlayerRuntime::from_config(&config, &device, Arc::new(LoggingSink))
        .context("Failed to create player runtime")?;

    if std::env::args().nth(1).as_deref() == Some("unpair") {
        runtime.identity().unpair().context("Failed to clear stored identity")?;
        info!("Stored identity cleared");
        return Ok(());
    }

    let _event_log = log_screen_events(events);

    runtime
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("Player runtime failed")?;

    Ok(())
}
