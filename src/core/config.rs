//! Runtime configuration.
//!
//! All settings come from environment variables so the binary can be pointed
//! at different sensor endpoints without rebuilding. Pipeline thresholds are
//! fixed constants and are not configurable here.
use std::{collections::BTreeMap, env, time::Duration};

use anyhow::{anyhow, Result};
use log::info;

use crate::core::constants::MAX_DEVICES;
use crate::model::descriptor::DeviceDescriptor;

pub const ENV_DEVICES: &str = "VITALS_DEVICES";
pub const ENV_POLL_MS: &str = "VITALS_POLL_MS";
pub const ENV_IDLE_MS: &str = "VITALS_IDLE_MS";
pub const ENV_REPLAY_MS: &str = "VITALS_REPLAY_MS";
pub const ENV_SNAPSHOT_JSON: &str = "VITALS_SNAPSHOT_JSON";

/// Strongly typed application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Configured endpoints keyed by device id.
    pub devices: BTreeMap<u8, DeviceDescriptor>,
    /// Cadence at which snapshots are printed.
    pub poll_interval: Duration,
    /// Pause a worker takes after a read that returned no data.
    pub idle_interval: Duration,
    /// Delay between lines replayed from capture files.
    pub replay_interval: Duration,
    /// Print snapshots as JSON lines instead of a text summary.
    pub json_snapshots: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devices: BTreeMap::new(),
            poll_interval: Duration::from_millis(500),
            idle_interval: Duration::from_millis(20),
            replay_interval: Duration::from_millis(1000),
            json_snapshots: false,
        }
    }
}

fn parse_millis(name: &str, value: Option<String>, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| anyhow!("Invalid {}: {}", name, e)),
    }
}

/// Parses `ID=DESCRIPTOR` pairs separated by commas.
pub fn parse_devices(spec: &str) -> Result<BTreeMap<u8, DeviceDescriptor>> {
    let mut devices = BTreeMap::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, address) = entry
            .split_once('=')
            .ok_or(anyhow!("Invalid {} entry {:?}: expected ID=DESCRIPTOR", ENV_DEVICES, entry))?;
        let id: u8 = id
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid device id in {:?}: {}", entry, e))?;
        if !(1..=MAX_DEVICES).contains(&id) {
            return Err(anyhow!("Device id {} is outside 1..={}", id, MAX_DEVICES));
        }
        let descriptor = DeviceDescriptor::new(address.trim(), format!("sensor {}", id));
        if devices.insert(id, descriptor).is_some() {
            return Err(anyhow!("Device id {} configured twice", id));
        }
    }
    Ok(devices)
}

impl Config {
    /// Builds a configuration from a variable lookup function.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let defaults = Self::default();
        let devices = match lookup(ENV_DEVICES) {
            Some(spec) => parse_devices(&spec)?,
            None => BTreeMap::new(),
        };
        Ok(Self {
            devices,
            poll_interval: parse_millis(ENV_POLL_MS, lookup(ENV_POLL_MS), defaults.poll_interval)?,
            idle_interval: parse_millis(ENV_IDLE_MS, lookup(ENV_IDLE_MS), defaults.idle_interval)?,
            replay_interval: parse_millis(
                ENV_REPLAY_MS,
                lookup(ENV_REPLAY_MS),
                defaults.replay_interval,
            )?,
            json_snapshots: lookup(ENV_SNAPSHOT_JSON)
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(defaults.json_snapshots),
        })
    }

    /// Loads configuration from the process environment.
    pub fn load_from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Logs the loaded configuration.
    pub fn log_config(&self) {
        info!("Configuration loaded:");
        for (id, descriptor) in &self.devices {
            info!("  device {}      : {}", id, descriptor.address);
        }
        info!("  poll interval : {:?}", self.poll_interval);
        info!("  idle interval : {:?}", self.idle_interval);
        info!("  replay pace   : {:?}", self.replay_interval);
        info!("  json output   : {}", self.json_snapshots);
    }
}
