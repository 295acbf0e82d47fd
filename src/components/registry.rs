//! Device Registry Component
//!
//! This module owns the set of device sessions, keyed by device id, and exposes
//! the connect/disconnect operations and the read-only snapshots consumed by the
//! presentation layer. Every session runs its own reception worker; the registry
//! performs no cross-device computation.
use crate::api::{
    controller::{RegistryApi, TransportProvider},
    model::SnapshotApi,
};
use crate::components::session::DeviceSession;
use crate::core::constants::MAX_DEVICES;
use crate::model::device::{ConnectionStatus, DeviceState};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::join_all;
use log::info;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Manages up to three independent device sessions.
pub struct DeviceRegistry {
    provider: Arc<dyn TransportProvider>,
    sessions: RwLock<BTreeMap<u8, Arc<DeviceSession>>>,
    idle: Duration,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    ///
    /// # Arguments
    /// - `provider`: Opens transports for `connect`.
    /// - `idle`: Pause a worker takes after a read that returned no data.
    pub fn new(provider: Arc<dyn TransportProvider>, idle: Duration) -> Self {
        Self {
            provider,
            sessions: RwLock::new(BTreeMap::new()),
            idle,
        }
    }

    fn check_id(id: u8) -> Result<()> {
        if (1..=MAX_DEVICES).contains(&id) {
            Ok(())
        } else {
            Err(anyhow!("device id {} is outside 1..={}", id, MAX_DEVICES))
        }
    }

    /// Registers device `id` without connecting it, so that it shows up in
    /// snapshots as disconnected.
    pub async fn configure(&self, id: u8) -> Result<()> {
        Self::check_id(id)?;
        self.session_or_insert(id).await;
        Ok(())
    }

    async fn session_or_insert(&self, id: u8) -> Arc<DeviceSession> {
        self.sessions
            .write()
            .await
            .entry(id)
            .or_insert_with(|| Arc::new(DeviceSession::new(id, self.idle)))
            .clone()
    }

    async fn session(&self, id: u8) -> Result<Arc<DeviceSession>> {
        Self::check_id(id)?;
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(anyhow!("device {} is not configured", id))
    }
}

#[async_trait]
impl SnapshotApi for DeviceRegistry {
    async fn snapshot(&self, id: u8) -> Option<DeviceState> {
        let session = self.sessions.read().await.get(&id).cloned()?;
        Some(session.snapshot().await)
    }

    async fn snapshot_all(&self) -> BTreeMap<u8, DeviceState> {
        let sessions: Vec<Arc<DeviceSession>> =
            self.sessions.read().await.values().cloned().collect();
        let mut result = BTreeMap::new();
        for session in sessions {
            result.insert(session.device_id(), session.snapshot().await);
        }
        result
    }
}

#[async_trait]
impl RegistryApi for DeviceRegistry {
    async fn connect(&self, id: u8, descriptor: &str) -> Result<ConnectionStatus> {
        Self::check_id(id)?;
        let session = self.session_or_insert(id).await;
        let status = session.connect(self.provider.as_ref(), descriptor).await?;
        info!("device {} on {}: {}", id, descriptor, status);
        Ok(status)
    }

    async fn disconnect(&self, id: u8) -> Result<()> {
        self.session(id).await?.disconnect().await;
        info!("device {} disconnected", id);
        Ok(())
    }

    async fn reset(&self, id: u8) -> Result<()> {
        self.session(id).await?.reset().await;
        Ok(())
    }

    async fn disconnect_all(&self) {
        let sessions: Vec<Arc<DeviceSession>> =
            self.sessions.read().await.values().cloned().collect();
        join_all(sessions.iter().map(|s| s.disconnect())).await;
        info!("all devices disconnected");
    }
}
