// src/tracking/speed.rs
//
// Instantaneous speed from centroid displacement, and the per-track
// moving-average window that smooths it.

use crate::types::{Point, SpeedConfig};
use std::collections::VecDeque;

/// m/s → km/h
const MPS_TO_KMH: f64 = 3.6;

#[derive(Debug, Clone, Copy)]
pub struct SpeedEstimator {
    pixels_to_meters: f64,
    max_speed: f64,
}

impl SpeedEstimator {
    pub fn new(pixels_to_meters: f64, max_speed: f64) -> Self {
        Self {
            pixels_to_meters,
            max_speed,
        }
    }

    pub fn from_config(cfg: &SpeedConfig) -> Self {
        Self::new(cfg.pixels_to_meters, cfg.max_speed)
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    /// Real-world distance in metres for a pixel displacement.
    pub fn distance_m(&self, from: &Point, to: &Point) -> f64 {
        from.distance(to) as f64 * self.pixels_to_meters
    }

    /// Speed in km/h between two observations. A non-positive elapsed time
    /// (duplicate timestamps, a rewound clock) reads as standing still.
    pub fn estimate(&self, prev: &Point, curr: &Point, elapsed_secs: f64) -> f64 {
        if !(elapsed_secs > 0.0) {
            return 0.0;
        }
        let speed_mps = self.distance_m(prev, curr) / elapsed_secs;
        self.clamp(speed_mps * MPS_TO_KMH)
    }

    pub fn clamp(&self, speed_kmh: f64) -> f64 {
        if speed_kmh.is_nan() {
            return 0.0;
        }
        speed_kmh.clamp(0.0, self.max_speed)
    }
}

/// Simple moving average over the last `capacity` raw samples.
#[derive(Debug, Clone)]
pub struct SpeedWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    max_speed: f64,
}

impl SpeedWindow {
    pub fn new(capacity: usize, max_speed: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            max_speed,
        }
    }

    /// Push a raw sample and return the smoothed speed.
    pub fn push(&mut self, raw_kmh: f64) -> f64 {
        let sample = if raw_kmh.is_nan() {
            0.0
        } else {
            raw_kmh.clamp(0.0, self.max_speed)
        };
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.mean()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let avg = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        avg.clamp(0.0, self.max_speed)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> SpeedEstimator {
        SpeedEstimator::new(0.1, 200.0)
    }

    #[test]
    fn test_five_pixels_in_one_second() {
        let speed = estimator().estimate(&Point::new(100.0, 100.0), &Point::new(104.0, 103.0), 1.0);
        assert!((speed - 1.8).abs() < 1e-6, "got {}", speed);
    }

    #[test]
    fn test_zero_or_negative_elapsed_is_zero() {
        let est = estimator();
        let a = Point::new(0.0, 0.0);
        let b = Point::new(300.0, 400.0);
        assert_eq!(est.estimate(&a, &b, 0.0), 0.0);
        assert_eq!(est.estimate(&a, &b, -0.5), 0.0);
        assert_eq!(est.estimate(&a, &b, f64::NAN), 0.0);
    }

    #[test]
    fn test_implausible_speed_is_clamped() {
        // 500 px in 33 ms = 50 m / 0.033 s ≈ 5454 km/h
        let speed = estimator().estimate(&Point::new(0.0, 0.0), &Point::new(500.0, 0.0), 0.033);
        assert_eq!(speed, 200.0);
    }

    #[test]
    fn test_distance_uses_calibration_scale() {
        let d = estimator().distance_m(&Point::new(0.0, 0.0), &Point::new(30.0, 40.0));
        assert!((d - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_is_bounded_and_evicts_oldest() {
        let mut window = SpeedWindow::new(3, 200.0);
        for s in [10.0, 20.0, 30.0, 40.0, 50.0] {
            window.push(s);
            assert!(window.len() <= 3);
        }
        let kept: Vec<f64> = window.samples().collect();
        assert_eq!(kept, vec![30.0, 40.0, 50.0]);
        assert!((window.mean() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_weights_samples_equally() {
        let mut window = SpeedWindow::new(5, 200.0);
        window.push(10.0);
        let smoothed = window.push(20.0);
        assert!((smoothed - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_clamps_samples() {
        let mut window = SpeedWindow::new(2, 100.0);
        assert_eq!(window.push(500.0), 100.0);
        assert_eq!(window.push(-20.0), 50.0);
    }

    #[test]
    fn test_zero_capacity_is_coerced() {
        let mut window = SpeedWindow::new(0, 200.0);
        window.push(12.0);
        window.push(24.0);
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.len(), 1);
        assert_eq!(window.mean(), 24.0);
    }
}
