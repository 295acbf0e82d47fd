//! Vital-sign monitor
//!
//! Connects to the configured sensor endpoints, runs one reception worker per
//! device and prints a snapshot of every device at a fixed cadence until
//! interrupted.

use anyhow::Result;
use env_logger::Env;
use log::{error, info, warn};
use std::sync::Arc;
use vitals_rs::{
    api::{
        controller::{DeviceDiscovery, RegistryApi},
        model::SnapshotApi,
    },
    components::{
        registry::DeviceRegistry,
        transport::{DescriptorTransportProvider, StaticDiscovery},
    },
    core::config::Config,
};

/// Main entry point of the application.
///
/// Initializes logging, loads the configuration, connects every configured
/// device and polls snapshots until Ctrl-C is received.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger with environment-specific settings.
    env_logger::Builder::from_env(
        Env::default()
            .filter_or("VITALS_LOG_LEVEL", "info")
            .write_style_or("VITALS_LOG_STYLE", "always"),
    )
    .init();

    let config = Config::load_from_env()?;
    config.log_config();
    if config.devices.is_empty() {
        warn!("no devices configured, set VITALS_DEVICES (e.g. 1=tcp://127.0.0.1:9001)");
    }

    let discovery = StaticDiscovery::new(config.devices.values().cloned().collect());
    for descriptor in discovery.discover().await? {
        info!("available: {}", descriptor);
    }

    let registry = Arc::new(DeviceRegistry::new(
        Arc::new(DescriptorTransportProvider::new(config.replay_interval)),
        config.idle_interval,
    ));
    for (id, descriptor) in &config.devices {
        if let Err(e) = registry.connect(*id, &descriptor.address).await {
            error!("could not connect device {}: {}", id, e);
        }
    }

    let mut ticker = tokio::time::interval(config.poll_interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                for state in registry.snapshot_all().await.values() {
                    if config.json_snapshots {
                        println!("{}", serde_json::to_string(state)?);
                    } else {
                        println!("{}", state);
                    }
                }
            }
        }
    }

    info!("shutting down");
    registry.disconnect_all().await;
    Ok(())
}
