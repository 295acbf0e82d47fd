//! Aggregate heart rate statistics.
//!
//! Metrics are recomputed in full from the bounded [`History`] on every update.
//! All values are in beats per minute; no conversion to inter-beat intervals
//! takes place.

use crate::core::constants::{HISTORY_CAPACITY, METRICS_MIN_SAMPLES};
use log::trace;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Bounded, chronological history of validated heart rate values together
/// with their device timestamps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct History {
    values: VecDeque<f64>,
    timestamps: VecDeque<i64>,
    capacity: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl History {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be non-zero");
        Self {
            values: VecDeque::with_capacity(capacity),
            timestamps: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a value, evicting the oldest entry when full.
    pub fn push(&mut self, value: f64, timestamp: i64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
            self.timestamps.pop_front();
        }
        self.values.push_back(value);
        self.timestamps.push_back(timestamp);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.timestamps.clear();
    }

    pub fn values(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.timestamps.iter().copied().collect()
    }

    /// Trend points as `[seconds, bpm]` pairs for plotting.
    pub fn trend(&self) -> Vec<[f64; 2]> {
        self.timestamps
            .iter()
            .zip(self.values.iter())
            .map(|(&ts, &hr)| [ts as f64 / 1000.0, hr])
            .collect()
    }
}

/// Derived statistics over the heart rate history.
///
/// `None` means "unavailable" and is a valid, renderable state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Mean heart rate.
    pub bpm: Option<f64>,
    /// Pulse rate proxy, always equal to `bpm`.
    pub ipm: Option<f64>,
    /// Population standard deviation of the heart rate.
    pub hrstd: Option<f64>,
    /// Root mean square of successive heart rate differences.
    pub rmssd: Option<f64>,
}

/// `calc_rmssd` function.
///
/// Calculates RMSSD (Root Mean Square of Successive Differences) over a heart
/// rate series.
///
/// # Arguments
/// - `data`: A slice of heart rate samples in beats per minute, oldest first.
///
/// # Returns
/// RMSSD value as a `f64`.
///
/// # Panics
/// Panics if the input slice has less than 2 elements.
pub fn calc_rmssd(data: &[f64]) -> f64 {
    assert!(
        data.len() > 1,
        "Data must contain at least two elements for RMSSD calculation."
    );

    let points_a = DVector::from_row_slice(&data[0..data.len() - 1]);
    let points_b = DVector::from_row_slice(&data[1..]);
    let successive_diffs = points_b - points_a;

    trace!(
        "Calculating RMSSD with successive differences: {:?}",
        successive_diffs.as_slice()
    );
    (successive_diffs.dot(&successive_diffs) / (successive_diffs.len() as f64)).sqrt()
}

/// `calc_std` function.
///
/// Calculates the population standard deviation (divisor `n`) of a heart rate
/// series.
///
/// # Arguments
/// - `data`: A slice of heart rate samples in beats per minute.
///
/// # Returns
/// Standard deviation as a `f64`.
///
/// # Panics
/// Panics if the input slice is empty.
pub fn calc_std(data: &[f64]) -> f64 {
    assert!(!data.is_empty(), "Data must not be empty for STD calculation.");

    let variance = DVector::from_row_slice(data).variance();
    trace!("Calculating STD with variance: {}", variance);
    variance.sqrt()
}

impl Metrics {
    /// Computes all metrics from scratch.
    ///
    /// Fewer than two samples leave every metric unavailable.
    pub fn compute(history: &[f64]) -> Self {
        if history.len() < METRICS_MIN_SAMPLES {
            return Self::default();
        }
        let bpm = DVector::from_row_slice(history).mean();
        Self {
            bpm: Some(bpm),
            ipm: Some(bpm),
            hrstd: Some(calc_std(history)),
            rmssd: Some(calc_rmssd(history)),
        }
    }

    /// Computes metrics over the values held in `history`.
    pub fn from_history(history: &History) -> Self {
        Self::compute(&history.values())
    }

    pub fn is_available(&self) -> bool {
        self.bpm.is_some()
    }
}
