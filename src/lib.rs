//! Multi-device vital-sign pipeline
//!
//! This crate turns delimited text records streamed by up to three pulse
//! oximetry sensors into validated, smoothed and statistically summarized
//! values suitable for real-time display. It integrates modules for line
//! decoding, range validation, rolling-window smoothing, heart rate metrics,
//! and the concurrent per-device reception workers that drive them.

/// Core utilities used throughout the crate.
pub mod core {
    /// Runtime configuration loaded from the environment.
    pub mod config;
    /// Pipeline constants and wire-format keys.
    pub mod constants;
}

/// Trait definitions at the seams to external collaborators.
pub mod api {
    /// Mutating API: transports, discovery, and the device registry.
    pub mod controller;
    /// Read-only snapshot API for the presentation layer.
    pub mod model;
}

/// Components implementing the APIs.
pub mod components {
    /// Registry managing all device sessions.
    pub mod registry;
    /// Per-device connection lifecycle and processing pipeline.
    pub mod session;
    /// Line framing, transports and discovery.
    pub mod transport;
}

/// Signal processing.
pub mod math {
    /// Heart rate history and aggregate metrics.
    pub mod metrics;
    /// Rolling-window smoothing buffers.
    pub mod smoothing;
    /// Physiological range checks.
    pub mod validation;
}

/// Data models of the domain.
pub mod model {
    /// Endpoint descriptors.
    pub mod descriptor;
    /// Per-device state and snapshots.
    pub mod device;
    /// Decoded sensor records.
    pub mod reading;
}
