//! Controller API
//!
//! This module defines the traits for the mutating side of the application:
//! the transport collaborators that deliver raw bytes, the discovery
//! collaborator that lists endpoints, and the registry that connects and
//! disconnects devices.
use crate::model::{descriptor::DeviceDescriptor, device::ConnectionStatus};
use anyhow::Result;
use async_trait::async_trait;

use super::model::SnapshotApi;

/// An open byte stream to one sensor endpoint.
#[async_trait]
pub trait Transport: Send {
    /// Reads the next chunk of bytes.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` with the received data; an empty chunk means no data
    ///   was available and the caller should idle briefly.
    /// - `Ok(None)` once the stream was closed by the remote end.
    /// - `Err(_)` on a read failure.
    ///
    /// Implementations must be cancel safe: dropping the returned future must
    /// not lose bytes that were already taken off the underlying stream.
    async fn read(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Opens transports from descriptors.
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Opens a byte stream to the endpoint named by `descriptor`.
    async fn open(&self, descriptor: &str) -> Result<Box<dyn Transport>>;
}

/// Lists the sensor endpoints that can be connected.
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Returns the known endpoints as address/name pairs.
    async fn discover(&self) -> Result<Vec<DeviceDescriptor>>;
}

/// RegistryApi trait
///
/// Extends the read-only [`SnapshotApi`] with the operations that change which
/// devices are connected.
#[async_trait]
pub trait RegistryApi: SnapshotApi {
    /// Connects device `id` to the endpoint named by `descriptor` and starts its
    /// reception worker.
    ///
    /// A failing transport is not an error of this call: the device moves to
    /// [`ConnectionStatus::Error`], which is returned. Errors are reserved for
    /// invalid ids and devices that are already connected.
    async fn connect(&self, id: u8, descriptor: &str) -> Result<ConnectionStatus>;

    /// Stops the reception worker of device `id` and discards its data.
    async fn disconnect(&self, id: u8) -> Result<()>;

    /// Discards the buffers and history of device `id` without disconnecting.
    async fn reset(&self, id: u8) -> Result<()>;

    /// Disconnects every device.
    async fn disconnect_all(&self);
}
