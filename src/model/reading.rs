//! Sensor Readings
//!
//! This module defines the decoded form of one sensor record and the tolerant
//! line decoder that produces it. A record is a single line of comma-separated
//! `KEY:VALUE` tokens, for example:
//!
//! ```text
//! DEV:1,HR:75,HR_VALID:1,SPO2:98,SPO2_VALID:1,IR_AVG:100000,IR_RANGE:50,TIMESTAMP:12345
//! ```

use crate::core::constants::{
    KEY_DEVICE, KEY_HR, KEY_HR_VALID, KEY_IR_AVG, KEY_IR_RANGE, KEY_SPO2, KEY_SPO2_VALID,
    KEY_STATUS, KEY_TIMESTAMP, MAX_DEVICES, STATUS_NO_FINGER,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;

/// Reasons a line could not be turned into a [`Reading`].
///
/// Decode errors are always recoverable: the offending line is dropped and
/// the stream continues with the next one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The line carried no `DEV` token.
    #[error("line has no DEV key")]
    MissingDevice,
    /// A key that expects an integer carried something else.
    #[error("value {value:?} for key {key} is not an integer")]
    InvalidInteger { key: String, value: String },
    /// The `DEV` token named a device outside `1..=3`.
    #[error("device id {0} is out of range")]
    DeviceOutOfRange(i64),
    /// The raw bytes of the line were not valid UTF-8.
    #[error("line is not valid UTF-8")]
    InvalidEncoding,
}

/// One decoded sensor record.
///
/// Produced once per line and never mutated afterwards. Optional keys that were
/// absent from the line are defaulted: measurements to `None`, validity flags to
/// `false` and signal-quality counters to `0`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Device id, `1..=3`.
    pub device_id: u8,
    /// Heart rate in beats per minute as reported by the sensor.
    pub heart_rate: Option<i64>,
    /// Sensor-side validity flag for `heart_rate`.
    pub heart_rate_valid: bool,
    /// Oxygen saturation in percent as reported by the sensor.
    pub spo2: Option<i64>,
    /// Sensor-side validity flag for `spo2`.
    pub spo2_valid: bool,
    /// Average infrared level.
    pub ir_avg: i64,
    /// Peak-to-peak infrared range.
    pub ir_range: i64,
    /// Device-local monotonic timestamp in milliseconds.
    pub device_timestamp: i64,
    /// Optional status token, e.g. `NO_FINGER`.
    pub status: Option<String>,
    /// Wall-clock instant at which the line was received.
    pub received_at: OffsetDateTime,
}

fn parse_int(key: &str, value: &str) -> Result<i64, DecodeError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| DecodeError::InvalidInteger {
            key: key.to_string(),
            value: value.to_string(),
        })
}

impl Reading {
    /// Decodes a line received right now.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        Self::decode_at(line, OffsetDateTime::now_utc())
    }

    /// Decodes a line, stamping it with the given reception instant.
    ///
    /// Tokens without a `:` separator and unknown keys are skipped. A repeated
    /// key overrides the earlier occurrence.
    ///
    /// # Errors
    /// Returns a [`DecodeError`] if the `DEV` key is missing or out of range, or
    /// if any integer-valued key holds a non-numeric value.
    pub fn decode_at(line: &str, received_at: OffsetDateTime) -> Result<Self, DecodeError> {
        let mut device_id = None;
        let mut reading = Reading {
            device_id: 0,
            heart_rate: None,
            heart_rate_valid: false,
            spo2: None,
            spo2_valid: false,
            ir_avg: 0,
            ir_range: 0,
            device_timestamp: 0,
            status: None,
            received_at,
        };

        for token in line.trim().split(',') {
            let Some((key, value)) = token.split_once(':') else {
                continue;
            };
            let key = key.trim();
            match key {
                KEY_DEVICE => device_id = Some(parse_int(key, value)?),
                KEY_HR => reading.heart_rate = Some(parse_int(key, value)?),
                KEY_HR_VALID => reading.heart_rate_valid = parse_int(key, value)? != 0,
                KEY_SPO2 => reading.spo2 = Some(parse_int(key, value)?),
                KEY_SPO2_VALID => reading.spo2_valid = parse_int(key, value)? != 0,
                KEY_IR_AVG => reading.ir_avg = parse_int(key, value)?,
                KEY_IR_RANGE => reading.ir_range = parse_int(key, value)?,
                KEY_TIMESTAMP => reading.device_timestamp = parse_int(key, value)?,
                KEY_STATUS => reading.status = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let id = device_id.ok_or(DecodeError::MissingDevice)?;
        if !(1..=MAX_DEVICES as i64).contains(&id) {
            return Err(DecodeError::DeviceOutOfRange(id));
        }
        reading.device_id = id as u8;
        Ok(reading)
    }

    /// Decodes raw line bytes, rejecting invalid UTF-8.
    pub fn decode_bytes(line: &[u8], received_at: OffsetDateTime) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(line).map_err(|_| DecodeError::InvalidEncoding)?;
        Self::decode_at(text, received_at)
    }

    /// Checks whether the sensor reported lost skin contact.
    pub fn is_no_finger(&self) -> bool {
        self.status.as_deref() == Some(STATUS_NO_FINGER)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DEV:{}", self.device_id)?;
        if let Some(hr) = self.heart_rate {
            write!(f, ",HR:{},HR_VALID:{}", hr, self.heart_rate_valid as u8)?;
        }
        if let Some(spo2) = self.spo2 {
            write!(f, ",SPO2:{},SPO2_VALID:{}", spo2, self.spo2_valid as u8)?;
        }
        write!(
            f,
            ",IR_AVG:{},IR_RANGE:{},TIMESTAMP:{}",
            self.ir_avg, self.ir_range, self.device_timestamp
        )?;
        if let Some(status) = &self.status {
            write!(f, ",STATUS:{}", status)?;
        }
        Ok(())
    }
}
