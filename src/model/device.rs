//! Device State Model
//!
//! This module defines the per-device state that a session accumulates and that
//! the registry hands out as immutable snapshots.

use crate::core::constants::PLACEHOLDER;
use crate::math::{
    metrics::{History, Metrics},
    smoothing::SmoothingBuffer,
};
use crate::model::reading::Reading;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection lifecycle of one sensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Receiving,
    NoFinger,
    Error,
}

impl ConnectionStatus {
    /// Whether values accumulated under this status may be displayed.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected | Self::Receiving | Self::NoFinger)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Receiving => "receiving",
            Self::NoFinger => "no finger",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Counters for data that was dropped inside the pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Complete lines handed to the decoder.
    pub lines: u64,
    /// Lines rejected by the decoder.
    pub decode_errors: u64,
    /// Heart rate values rejected by validation.
    pub hr_rejected: u64,
    /// SpO2 values rejected by validation.
    pub spo2_rejected: u64,
}

/// State of one device.
///
/// Mutated only by the owning session's reception pipeline; everyone else sees
/// cloned snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub device_id: u8,
    pub connection_status: ConnectionStatus,
    /// Transport descriptor of the current connection, if any.
    pub descriptor: Option<String>,
    /// Most recent decoded reading.
    pub latest: Option<Reading>,
    pub smoothed_hr: Option<f64>,
    pub smoothed_spo2: Option<f64>,
    pub metrics: Metrics,
    pub hr_buffer: SmoothingBuffer,
    pub spo2_buffer: SmoothingBuffer,
    pub history: History,
    pub diagnostics: Diagnostics,
    /// Message of the transport failure that moved the device to `Error`.
    pub last_error: Option<String>,
}

impl DeviceState {
    pub fn new(device_id: u8) -> Self {
        Self {
            device_id,
            connection_status: ConnectionStatus::Disconnected,
            descriptor: None,
            latest: None,
            smoothed_hr: None,
            smoothed_spo2: None,
            metrics: Metrics::default(),
            hr_buffer: SmoothingBuffer::default(),
            spo2_buffer: SmoothingBuffer::default(),
            history: History::default(),
            diagnostics: Diagnostics::default(),
            last_error: None,
        }
    }

    /// Discards readings, buffers, history and derived values. Diagnostics
    /// are kept so a failed device still reports what it dropped.
    pub fn discard_values(&mut self) {
        self.latest = None;
        self.smoothed_hr = None;
        self.smoothed_spo2 = None;
        self.metrics = Metrics::default();
        self.hr_buffer.clear();
        self.spo2_buffer.clear();
        self.history.clear();
    }

    /// Discards all accumulated data while keeping the connection fields.
    pub fn clear_data(&mut self) {
        self.discard_values();
        self.diagnostics = Diagnostics::default();
    }

    /// Heart rate trend as `[seconds, bpm]` points.
    pub fn trend(&self) -> Vec<[f64; 2]> {
        self.history.trend()
    }

    fn display(&self, value: Option<f64>, precision: usize) -> String {
        match value {
            Some(v) if self.connection_status.is_live() => format!("{:.*}", precision, v),
            _ => PLACEHOLDER.to_string(),
        }
    }

    pub fn display_hr(&self) -> String {
        self.display(self.smoothed_hr, 0)
    }

    pub fn display_spo2(&self) -> String {
        self.display(self.smoothed_spo2, 0)
    }

    pub fn display_bpm(&self) -> String {
        self.display(self.metrics.bpm, 1)
    }

    pub fn display_ipm(&self) -> String {
        self.display(self.metrics.ipm, 1)
    }

    pub fn display_hrstd(&self) -> String {
        self.display(self.metrics.hrstd, 2)
    }

    pub fn display_rmssd(&self) -> String {
        self.display(self.metrics.rmssd, 2)
    }
}

impl fmt::Display for DeviceState {
    /// One-line summary suitable for a terminal panel.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[dev {}] {:<12} HR {:>3} SpO2 {:>3} | BPM {:>5} IPM {:>5} HRSTD {:>5} RMSSD {:>5}",
            self.device_id,
            self.connection_status.to_string(),
            self.display_hr(),
            self.display_spo2(),
            self.display_bpm(),
            self.display_ipm(),
            self.display_hrstd(),
            self.display_rmssd(),
        )?;
        if let Some(err) = &self.last_error {
            write!(f, " ({})", err)?;
        }
        Ok(())
    }
}
