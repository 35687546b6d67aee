//! solax-cloud-poller - Solax Cloud inverter telemetry poller
//!
//! Polls one or more Solax inverters through the Solax Cloud API on a fixed
//! cadence and keeps a smoothed view of their meters for the host.

mod config;
mod inverter;
mod platform;
mod scheduler;
mod validate;

use config::{load_raw_config, ServiceConfig};
use platform::Platform;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("solax_cloud_poller=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServiceConfig::load();
    tracing::info!("Starting solax-cloud-poller with config {}", cfg.config_path);
    tracing::info!("Using Solax Cloud endpoint {}", cfg.api_url);

    let raw = load_raw_config(&cfg.config_path)?;

    // Validation or construction failures leave the platform inert
    let platform = Platform::new(&raw, &cfg);
    match platform.config() {
        Some(validated) => tracing::info!(
            "Polling {} inverters every {}s",
            validated.inverters.len(),
            validated.polling_frequency
        ),
        None => tracing::warn!("Platform is inert; no inverters will be polled"),
    }

    platform.accessories(|accessories| {
        for accessory in &accessories {
            match serde_json::to_string(accessory) {
                Ok(json) => tracing::info!("Accessory: {}", json),
                Err(e) => tracing::error!("Failed to encode accessory {}: {}", accessory.name, e),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    platform.shutdown().await;

    Ok(())
}
