//! Scalar Kalman-style smoother for signal strength readings.
//!
//! The state is a single estimate with its error covariance. Measurement
//! noise is not fixed: it is the variance of the last [`WINDOW_LEN`] raw
//! readings (floored at [`MIN_MEASUREMENT_NOISE`]), so a jittery signal is
//! trusted less and damped harder than a steady one.

use std::collections::VecDeque;

/// Number of raw readings kept for the measurement noise estimate.
pub const WINDOW_LEN: usize = 5;

/// Process noise added to the error covariance on every step.
pub const PROCESS_NOISE: f64 = 0.8;

/// Lower bound on the measurement noise.
pub const MIN_MEASUREMENT_NOISE: f64 = 0.8;

/// Rolling smoother owned by one client record.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalFilter {
    estimate: f64,
    error_covariance: f64,
    window: VecDeque<f64>,
}

impl SignalFilter {
    /// Seed the filter with its first reading. The estimate equals the reading.
    pub fn new(first_reading: f64) -> Self {
        let mut window = VecDeque::with_capacity(WINDOW_LEN);
        window.push_back(first_reading);
        Self {
            estimate: first_reading,
            error_covariance: 1.0,
            window,
        }
    }

    /// Current smoothed estimate.
    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    /// Feed one reading and return the new estimate.
    ///
    /// Non-finite readings are ignored. A non-finite intermediate result
    /// re-seeds the filter from `reading`, so the caller always receives a
    /// usable value.
    pub fn update(&mut self, reading: f64) -> f64 {
        if !reading.is_finite() {
            return self.estimate;
        }
        if self.window.len() == WINDOW_LEN {
            self.window.pop_front();
        }
        self.window.push_back(reading);

        let measurement_noise = window_variance(&self.window).max(MIN_MEASUREMENT_NOISE);
        let predicted_covariance = self.error_covariance + PROCESS_NOISE;
        let gain = predicted_covariance / (predicted_covariance + measurement_noise);
        let estimate = self.estimate + gain * (reading - self.estimate);
        let error_covariance = (1.0 - gain) * predicted_covariance;

        if estimate.is_finite() && error_covariance.is_finite() {
            self.estimate = estimate;
            self.error_covariance = error_covariance;
        } else {
            tracing::debug!(reading, "signal filter unstable, falling back to raw reading");
            *self = Self::new(reading);
        }
        self.estimate
    }
}

/// Population variance of the window.
fn window_variance(window: &VecDeque<f64>) -> f64 {
    let n = window.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean = window.iter().sum::<f64>() / n;
    window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n
}
