//! Fixed pipeline parameters and wire-format keys.

/// Highest device id a registry will accept (ids are `1..=MAX_DEVICES`).
pub const MAX_DEVICES: u8 = 3;

/// Heart rate sanity limits in beats per minute (inclusive).
pub const HR_MIN: i64 = 40;
pub const HR_MAX: i64 = 200;

/// SpO2 sanity limits in percent (inclusive).
pub const SPO2_MIN: i64 = 70;
pub const SPO2_MAX: i64 = 100;

/// Capacity of the per-metric smoothing window.
pub const SMOOTHING_CAPACITY: usize = 5;
/// Samples required before a smoothed value is reported.
pub const SMOOTHING_MIN_SAMPLES: usize = 3;

/// Capacity of the heart rate history (about five minutes at 1 Hz).
pub const HISTORY_CAPACITY: usize = 300;
/// Samples required before any aggregate metric is reported.
pub const METRICS_MIN_SAMPLES: usize = 2;

/// Longest line the framer buffers before discarding it as malformed.
pub const MAX_LINE_LEN: usize = 4096;

/// Status token sent by the sensor when it loses skin contact.
pub const STATUS_NO_FINGER: &str = "NO_FINGER";

pub const KEY_DEVICE: &str = "DEV";
pub const KEY_HR: &str = "HR";
pub const KEY_HR_VALID: &str = "HR_VALID";
pub const KEY_SPO2: &str = "SPO2";
pub const KEY_SPO2_VALID: &str = "SPO2_VALID";
pub const KEY_IR_AVG: &str = "IR_AVG";
pub const KEY_IR_RANGE: &str = "IR_RANGE";
pub const KEY_TIMESTAMP: &str = "TIMESTAMP";
pub const KEY_STATUS: &str = "STATUS";

/// Placeholder rendered for unavailable values.
pub const PLACEHOLDER: &str = "--";
