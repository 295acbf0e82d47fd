//! Rolling-window smoothing.
//!
//! A [`SmoothingBuffer`] keeps the last few admitted samples of one metric and
//! reduces them to a single display value. Heart rate uses the median so that
//! single-sample spikes are suppressed; SpO2 uses the mean for smoother
//! transitions.

use crate::core::constants::{SMOOTHING_CAPACITY, SMOOTHING_MIN_SAMPLES};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fixed-capacity FIFO window of validated samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SmoothingBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
    min_samples: usize,
}

impl Default for SmoothingBuffer {
    fn default() -> Self {
        Self::new(SMOOTHING_CAPACITY, SMOOTHING_MIN_SAMPLES)
    }
}

impl SmoothingBuffer {
    /// Creates an empty buffer.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, min_samples: usize) -> Self {
        assert!(capacity > 0, "smoothing capacity must be non-zero");
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            min_samples,
        }
    }

    /// Admits a sample, evicting the oldest one when full.
    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Samples in admission order, oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    fn has_enough(&self) -> bool {
        !self.samples.is_empty() && self.samples.len() >= self.min_samples
    }

    /// Median of the window, or `None` below the sample threshold.
    ///
    /// Even-length windows yield the average of the two middle values.
    pub fn median(&self) -> Option<f64> {
        if !self.has_enough() {
            return None;
        }
        let mut sorted = self.values();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

    /// Arithmetic mean of the window, or `None` below the sample threshold.
    pub fn mean(&self) -> Option<f64> {
        if !self.has_enough() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }
}
