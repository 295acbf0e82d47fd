//! This module defines the read-only API the presentation layer polls.
use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::model::device::DeviceState;

/// `SnapshotApi` trait.
///
/// Snapshots are owned copies taken under the session's lock, so they are
/// always internally consistent and never change after they are returned.
#[async_trait]
pub trait SnapshotApi: Send + Sync {
    /// Returns a copy of the state of device `id`, if it was ever configured.
    async fn snapshot(&self, id: u8) -> Option<DeviceState>;

    /// Returns copies of the states of all configured devices keyed by id.
    async fn snapshot_all(&self) -> BTreeMap<u8, DeviceState>;
}
