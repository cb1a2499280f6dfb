// src/pipeline/metrics.rs
//
// Counters shared between the frame loop, the persistence worker and the
// reporting task. Exported through logs via MetricsSummary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub stream_passes: Arc<AtomicU64>,
    pub detections_accepted: Arc<AtomicU64>,
    pub detections_rejected: Arc<AtomicU64>,
    pub tracks_created: Arc<AtomicU64>,
    pub tracks_retired: Arc<AtomicU64>,
    pub vehicles_counted: Arc<AtomicU64>,
    pub events_queued: Arc<AtomicU64>,
    pub events_spilled: Arc<AtomicU64>,
    pub events_persisted: Arc<AtomicU64>,
    pub events_failed: Arc<AtomicU64>,
    pub persistence_retries: Arc<AtomicU64>,
    pub frame_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            stream_passes: Arc::new(AtomicU64::new(0)),
            detections_accepted: Arc::new(AtomicU64::new(0)),
            detections_rejected: Arc::new(AtomicU64::new(0)),
            tracks_created: Arc::new(AtomicU64::new(0)),
            tracks_retired: Arc::new(AtomicU64::new(0)),
            vehicles_counted: Arc::new(AtomicU64::new(0)),
            events_queued: Arc::new(AtomicU64::new(0)),
            events_spilled: Arc::new(AtomicU64::new(0)),
            events_persisted: Arc::new(AtomicU64::new(0)),
            events_failed: Arc::new(AtomicU64::new(0)),
            persistence_retries: Arc::new(AtomicU64::new(0)),
            frame_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            stream_passes: self.stream_passes.load(Ordering::Relaxed),
            detections_accepted: self.detections_accepted.load(Ordering::Relaxed),
            detections_rejected: self.detections_rejected.load(Ordering::Relaxed),
            tracks_created: self.tracks_created.load(Ordering::Relaxed),
            tracks_retired: self.tracks_retired.load(Ordering::Relaxed),
            vehicles_counted: self.vehicles_counted.load(Ordering::Relaxed),
            events_queued: self.events_queued.load(Ordering::Relaxed),
            events_spilled: self.events_spilled.load(Ordering::Relaxed),
            events_persisted: self.events_persisted.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            persistence_retries: self.persistence_retries.load(Ordering::Relaxed),
            last_frame_us: self.frame_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub stream_passes: u64,
    pub detections_accepted: u64,
    pub detections_rejected: u64,
    pub tracks_created: u64,
    pub tracks_retired: u64,
    pub vehicles_counted: u64,
    pub events_queued: u64,
    pub events_spilled: u64,
    pub events_persisted: u64,
    pub events_failed: u64,
    pub persistence_retries: u64,
    pub last_frame_us: u64,
    pub elapsed_secs: f64,
}
