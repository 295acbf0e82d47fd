//! Physiological range checks.
//!
//! These are clinical sanity limits, not statistical ones. A value that fails
//! them never reaches a smoothing buffer, the history, or the metrics.

use crate::core::constants::{HR_MAX, HR_MIN, SPO2_MAX, SPO2_MIN};
use crate::model::reading::Reading;

/// Returns the heart rate if it is flagged valid and lies within `40..=200`.
pub fn accept_heart_rate(value: Option<i64>, valid: bool) -> Option<i64> {
    value.filter(|hr| valid && (HR_MIN..=HR_MAX).contains(hr))
}

/// Returns the SpO2 value if it is flagged valid and lies within `70..=100`.
pub fn accept_spo2(value: Option<i64>, valid: bool) -> Option<i64> {
    value.filter(|spo2| valid && (SPO2_MIN..=SPO2_MAX).contains(spo2))
}

/// Values of a reading that passed validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Validated {
    pub heart_rate: Option<i64>,
    pub spo2: Option<i64>,
}

impl Validated {
    /// Applies both predicates to a decoded reading.
    pub fn from_reading(reading: &Reading) -> Self {
        Self {
            heart_rate: accept_heart_rate(reading.heart_rate, reading.heart_rate_valid),
            spo2: accept_spo2(reading.spo2, reading.spo2_valid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heart_rate_bounds() {
        assert_eq!(accept_heart_rate(Some(40), true), Some(40));
        assert_eq!(accept_heart_rate(Some(200), true), Some(200));
        assert_eq!(accept_heart_rate(Some(39), true), None);
        assert_eq!(accept_heart_rate(Some(201), true), None);
        assert_eq!(accept_heart_rate(Some(-5), true), None);
        assert_eq!(accept_heart_rate(None, true), None);
    }

    #[test]
    fn test_heart_rate_requires_flag() {
        assert_eq!(accept_heart_rate(Some(72), false), None);
    }

    #[test]
    fn test_spo2_bounds() {
        assert_eq!(accept_spo2(Some(70), true), Some(70));
        assert_eq!(accept_spo2(Some(100), true), Some(100));
        assert_eq!(accept_spo2(Some(69), true), None);
        assert_eq!(accept_spo2(Some(101), true), None);
        assert_eq!(accept_spo2(Some(98), false), None);
    }

    #[test]
    fn test_from_reading() {
        let reading =
            Reading::decode("DEV:1,HR:250,HR_VALID:1,SPO2:97,SPO2_VALID:1").unwrap();
        let validated = Validated::from_reading(&reading);
        assert_eq!(validated.heart_rate, None);
        assert_eq!(validated.spo2, Some(97));
    }
}
