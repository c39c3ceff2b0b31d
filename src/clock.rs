//! Monotonic time and the rolling frame-latency window.

use crate::consts::ROLLING_LATENCY_CAPACITY;
use std::collections::VecDeque;

/// Fixed-capacity rolling window of frame durations, in milliseconds.
///
/// See [`crate::qos`] for how the window feeds the overload decision.
#[derive(Debug, Default)]
pub struct RollingLatency {
    samples: VecDeque<f64>,
}

impl RollingLatency {
    /// Creates an empty window.
    #[must_use]
    pub fn new() -> Self {
        Self { samples: VecDeque::with_capacity(ROLLING_LATENCY_CAPACITY) }
    }

    /// Appends a frame duration, evicting the oldest sample if the window is
    /// full.
    pub fn push(&mut self, duration_ms: f64) {
        if self.samples.len() >= ROLLING_LATENCY_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(duration_ms);
    }

    /// Mean of the current window, or `None` if empty.
    #[must_use]
    pub fn avg_ms(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_has_no_average() {
        let window = RollingLatency::new();
        assert_eq!(window.avg_ms(), None);
    }

    #[test]
    fn window_evicts_oldest_past_capacity() {
        let mut window = RollingLatency::new();
        for i in 0..ROLLING_LATENCY_CAPACITY + 5 {
            window.push(i as f64);
        }
        assert_eq!(window.len(), ROLLING_LATENCY_CAPACITY);
        // oldest 5 samples (0..5) evicted; average is over 5..35
        let expected: f64 = (5..ROLLING_LATENCY_CAPACITY + 5).map(|v| v as f64).sum::<f64>()
            / ROLLING_LATENCY_CAPACITY as f64;
        assert!((window.avg_ms().unwrap() - expected).abs() < 1e-9);
    }
}
