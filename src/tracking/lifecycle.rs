// src/tracking/lifecycle.rs
//
// Owner of the active-track registry. Drives one frame at a time:
//   detections → association → speed + smoothing → counting line → retirement
//
// Tracks are created on unmatched detections and retired (ACTIVE → COMPLETED)
// once they go unmatched for more than `max_missed_frames` frames. Retirement
// consumes the Track, so final statistics cannot change afterwards.

use super::association::{Association, Associator};
use super::counting_line::CountingLine;
use super::speed::{SpeedEstimator, SpeedWindow};
use super::track::{Track, TrackSummary};
use crate::pipeline::event_bus::{EventBus, TrackingEvent};
use crate::types::{Config, CountingConfig, Frame, Point, SpeedConfig, TrackId, TrackingConfig};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// What happened to one detection of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionOutcome {
    pub detection_index: usize,
    pub track_id: TrackId,
    pub created: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub frame_id: u64,
    pub outcomes: Vec<DetectionOutcome>,
    pub created: usize,
    pub matched: usize,
    pub counted: usize,
    pub retired: Vec<TrackSummary>,
}

pub struct LifecycleManager {
    tracks: BTreeMap<TrackId, Track>,
    associator: Associator,
    estimator: SpeedEstimator,
    counting_line: CountingLine,
    history_length: usize,
    max_missed_frames: u32,
    next_id: TrackId,
    total_counted: u64,
}

impl LifecycleManager {
    pub fn new(speed: &SpeedConfig, tracking: &TrackingConfig, counting: &CountingConfig) -> Self {
        Self {
            tracks: BTreeMap::new(),
            associator: Associator::from_config(tracking),
            estimator: SpeedEstimator::from_config(speed),
            counting_line: CountingLine::from_config(counting),
            history_length: speed.history_length,
            max_missed_frames: tracking.max_missed_frames,
            next_id: 1,
            total_counted: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.speed, &config.tracking, &config.counting)
    }

    /// Start allocating ids at `first_id` (e.g. one past what the store already holds).
    pub fn with_first_id(mut self, first_id: TrackId) -> Self {
        self.next_id = first_id.max(1);
        self
    }

    pub fn process_frame(&mut self, frame: &Frame, bus: &mut EventBus) -> FrameReport {
        let ts = frame.timestamp_ms;
        let mut report = FrameReport {
            frame_id: frame.frame_id,
            ..Default::default()
        };
        let mut seen: BTreeSet<TrackId> = BTreeSet::new();

        self.associator.begin_frame();

        for (idx, det) in frame.detections.iter().enumerate() {
            let centroid = det.centroid();
            let candidates = self
                .tracks
                .values()
                .filter(|t| t.is_active())
                .map(|t| (t.id, t.last_position));

            let (track_id, created) = match self.associator.associate(&centroid, candidates) {
                Association::Matched { track_id, distance } => {
                    debug!(
                        "Frame {}: detection {} → track {} ({:.1}px)",
                        frame.frame_id, idx, track_id, distance
                    );
                    self.update_track(track_id, centroid, ts, bus);
                    report.matched += 1;
                    (track_id, false)
                }
                Association::New => {
                    let id = self.spawn_track(centroid, ts, bus);
                    self.associator.claim(id);
                    report.created += 1;
                    (id, true)
                }
            };

            seen.insert(track_id);
            if self.check_counting_line(track_id, centroid.y, ts, bus) {
                report.counted += 1;
            }
            report.outcomes.push(DetectionOutcome {
                detection_index: idx,
                track_id,
                created,
            });
        }

        report.retired = self.retire_unmatched(&seen, ts, bus);
        report
    }

    /// Retire every active track, e.g. when the stream is stopped.
    pub fn retire_all(&mut self, timestamp_ms: f64, bus: &mut EventBus) -> Vec<TrackSummary> {
        let tracks = std::mem::take(&mut self.tracks);
        tracks
            .into_values()
            .map(|track| self.finish(track, timestamp_ms, bus))
            .collect()
    }

    fn spawn_track(&mut self, centroid: Point, ts: f64, bus: &mut EventBus) -> TrackId {
        let id = self.next_id;
        self.next_id += 1;

        let window = SpeedWindow::new(self.history_length, self.estimator.max_speed());
        let track = Track::new(id, centroid, ts, window);
        info!(
            "🆕 New vehicle tracked: {} at ({:.0}, {:.0})",
            track.label(),
            centroid.x,
            centroid.y
        );
        self.tracks.insert(id, track);

        bus.publish(TrackingEvent::VehicleEntered {
            id,
            entry_time: Utc::now(),
            timestamp_ms: ts,
            position: centroid,
        });
        id
    }

    fn update_track(&mut self, id: TrackId, centroid: Point, ts: f64, bus: &mut EventBus) {
        let Some(track) = self.tracks.get_mut(&id) else {
            return;
        };

        let elapsed_secs = (ts - track.last_update_ms) / 1000.0;
        let raw = self
            .estimator
            .estimate(&track.last_position, &centroid, elapsed_secs);
        let smoothed = track.speed_window.push(raw);
        let step_m = self.estimator.distance_m(&track.last_position, &centroid);
        track.apply_sample(centroid, ts, smoothed, step_m);

        bus.publish(TrackingEvent::SpeedRecorded {
            id,
            recorded_at: Utc::now(),
            timestamp_ms: ts,
            speed_kmh: smoothed,
            position: centroid,
        });
    }

    fn check_counting_line(&mut self, id: TrackId, cy: f32, ts: f64, bus: &mut EventBus) -> bool {
        let Some(track) = self.tracks.get_mut(&id) else {
            return false;
        };
        if !self.counting_line.check(cy, &mut track.counted) {
            return false;
        }

        self.total_counted += 1;
        info!(
            "🔢 {} crossed the counting line (total {})",
            track.label(),
            self.total_counted
        );
        bus.publish(TrackingEvent::VehicleCounted {
            id,
            total_counted: self.total_counted,
            timestamp_ms: ts,
        });
        true
    }

    fn retire_unmatched(
        &mut self,
        seen: &BTreeSet<TrackId>,
        ts: f64,
        bus: &mut EventBus,
    ) -> Vec<TrackSummary> {
        let unmatched: Vec<TrackId> = self
            .tracks
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();

        let mut retired = Vec::new();
        for id in unmatched {
            let expired = match self.tracks.get_mut(&id) {
                Some(track) => {
                    track.missed_frames += 1;
                    track.missed_frames > self.max_missed_frames
                }
                None => false,
            };
            if !expired {
                continue;
            }
            if let Some(track) = self.tracks.remove(&id) {
                retired.push(self.finish(track, ts, bus));
            }
        }
        retired
    }

    fn finish(&self, track: Track, ts: f64, bus: &mut EventBus) -> TrackSummary {
        let label = track.label();
        let summary = track.complete(ts);
        info!(
            "🏁 {} left: max {:.1} km/h, avg {:.1} km/h, {:.1} m over {} samples",
            label,
            summary.max_speed,
            summary.average_speed,
            summary.total_distance,
            summary.speed_sample_count
        );
        bus.publish(TrackingEvent::VehicleExited {
            exit_time: Utc::now(),
            summary: summary.clone(),
        });
        summary
    }

    pub fn active_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn total_counted(&self) -> u64 {
        self.total_counted
    }

    #[cfg(test)]
    pub fn next_id(&self) -> TrackId {
        self.next_id
    }

    #[cfg(test)]
    pub fn get_track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }
}
