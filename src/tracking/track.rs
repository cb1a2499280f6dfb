// src/tracking/track.rs

use super::speed::SpeedWindow;
use crate::types::{Point, TrackId};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackStatus {
    Active,
    Completed,
}

/// One physical vehicle followed across frames.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub last_position: Point,
    /// Stream clock (ms) of the last successful match
    pub last_update_ms: f64,
    pub first_seen_ms: f64,
    pub current_speed: f64,
    pub max_speed: f64,
    pub speed_sum: f64,
    pub speed_sample_count: u64,
    /// Metres
    pub total_distance: f64,
    pub speed_window: SpeedWindow,
    pub status: TrackStatus,
    pub counted: bool,
    pub missed_frames: u32,
}

impl Track {
    pub fn new(id: TrackId, position: Point, timestamp_ms: f64, window: SpeedWindow) -> Self {
        Self {
            id,
            last_position: position,
            last_update_ms: timestamp_ms,
            first_seen_ms: timestamp_ms,
            current_speed: 0.0,
            max_speed: 0.0,
            speed_sum: 0.0,
            speed_sample_count: 0,
            total_distance: 0.0,
            speed_window: window,
            status: TrackStatus::Active,
            counted: false,
            missed_frames: 0,
        }
    }

    pub fn label(&self) -> String {
        format!("Vehicle_{}", self.id)
    }

    pub fn is_active(&self) -> bool {
        self.status == TrackStatus::Active
    }

    pub fn average_speed(&self) -> f64 {
        if self.speed_sample_count > 0 {
            self.speed_sum / self.speed_sample_count as f64
        } else {
            0.0
        }
    }

    /// Fold one smoothed speed sample and the step distance into the stats.
    pub fn apply_sample(&mut self, position: Point, timestamp_ms: f64, speed_kmh: f64, step_m: f64) {
        self.current_speed = speed_kmh;
        self.max_speed = self.max_speed.max(speed_kmh);
        self.speed_sum += speed_kmh;
        self.speed_sample_count += 1;
        self.total_distance += step_m;
        self.last_position = position;
        self.last_update_ms = timestamp_ms;
        self.missed_frames = 0;
    }

    /// Terminal transition. Consumes the track so nothing can touch it after.
    pub fn complete(mut self, exited_ms: f64) -> TrackSummary {
        self.status = TrackStatus::Completed;
        TrackSummary {
            id: self.id,
            status: self.status,
            max_speed: self.max_speed,
            average_speed: self.average_speed(),
            total_distance: self.total_distance,
            speed_sample_count: self.speed_sample_count,
            counted: self.counted,
            first_seen_ms: self.first_seen_ms,
            last_seen_ms: self.last_update_ms,
            exited_ms,
        }
    }
}

/// Final, immutable statistics of a retired track.
#[derive(Debug, Clone, Serialize)]
pub struct TrackSummary {
    pub id: TrackId,
    pub status: TrackStatus,
    pub max_speed: f64,
    pub average_speed: f64,
    pub total_distance: f64,
    pub speed_sample_count: u64,
    pub counted: bool,
    pub first_seen_ms: f64,
    pub last_seen_ms: f64,
    pub exited_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> Track {
        Track::new(1, Point::new(0.0, 0.0), 0.0, SpeedWindow::new(5, 200.0))
    }

    #[test]
    fn test_average_without_samples_is_zero() {
        let summary = track().complete(33.0);
        assert_eq!(summary.average_speed, 0.0);
        assert_eq!(summary.status, TrackStatus::Completed);
    }

    #[test]
    fn test_average_is_sum_over_count() {
        let mut t = track();
        t.apply_sample(Point::new(1.0, 0.0), 33.0, 10.0, 0.1);
        t.apply_sample(Point::new(2.0, 0.0), 66.0, 20.0, 0.1);
        t.apply_sample(Point::new(3.0, 0.0), 99.0, 45.0, 0.1);
        let summary = t.complete(132.0);
        assert_eq!(summary.average_speed, 75.0 / 3.0);
        assert_eq!(summary.max_speed, 45.0);
        assert!((summary.total_distance - 0.3).abs() < 1e-9);
        assert_eq!(summary.last_seen_ms, 99.0);
    }
}
