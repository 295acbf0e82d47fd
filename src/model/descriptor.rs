//! Device descriptors handed out by discovery and consumed by `connect`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address and human readable name of a sensor endpoint.
///
/// The address is an opaque transport descriptor such as `tcp://host:port`
/// or `file:/path/to/capture.log`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub address: String,
    pub name: String,
}

impl DeviceDescriptor {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}
