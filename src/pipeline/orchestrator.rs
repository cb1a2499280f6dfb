// src/pipeline/orchestrator.rs
//
// The frame loop. Synchronous and single-threaded; the binary runs it on a
// blocking thread. Per frame:
//
//   source → size filter → LifecycleManager → EventBus → PersistenceGateway
//                                         └─→ SnapshotPublisher
//
// The loop checks the stop signal before every frame and applies the
// end-of-stream policy when the source runs dry.

use super::event_bus::{EventBus, TrackingEvent};
use super::metrics::PipelineMetrics;
use super::snapshot::{SnapshotPublisher, TrafficSnapshot};
use crate::persistence::PersistenceGateway;
use crate::source::{DetectionSource, MinSizeFilter};
use crate::tracking::LifecycleManager;
use crate::types::{Config, EndOfStream, Frame};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

const EVENT_BUS_HIGH_WATER: usize = 4096;

#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub frames: u64,
    pub passes: u32,
    pub tracks_created: u64,
    pub tracks_retired: u64,
    pub vehicles_counted: u64,
    pub detections_rejected: u64,
    pub last_frame_id: u64,
    pub stopped_by_signal: bool,
    /// Source lines that could not be decoded or parsed
    pub skipped_lines: u64,
    /// Events still spilled when the loop ended, handed over during shutdown
    pub flushed_on_shutdown: usize,
}

pub struct FrameLoop {
    source: Box<dyn DetectionSource + Send>,
    filter: MinSizeFilter,
    lifecycle: LifecycleManager,
    bus: EventBus,
    gateway: PersistenceGateway,
    publisher: SnapshotPublisher,
    metrics: PipelineMetrics,
    stop: StopSignal,
    end_of_stream: EndOfStream,
    max_passes: Option<u32>,
    retire_on_shutdown: bool,
    progress_every: u64,
    last_timestamp_ms: f64,
}

impl FrameLoop {
    pub fn new(
        config: &Config,
        source: Box<dyn DetectionSource + Send>,
        lifecycle: LifecycleManager,
        gateway: PersistenceGateway,
        publisher: SnapshotPublisher,
        metrics: PipelineMetrics,
        stop: StopSignal,
    ) -> Self {
        Self {
            source,
            filter: MinSizeFilter::from_config(&config.detection),
            lifecycle,
            bus: EventBus::new(EVENT_BUS_HIGH_WATER),
            gateway,
            publisher,
            metrics,
            stop,
            end_of_stream: config.source.end_of_stream,
            max_passes: config.source.max_passes,
            retire_on_shutdown: config.pipeline.retire_on_shutdown,
            progress_every: config.pipeline.progress_every_frames,
            last_timestamp_ms: 0.0,
        }
    }

    /// Run until the stream ends or the stop signal trips. Always retires
    /// (if configured) and flushes pending persistence before returning,
    /// even when the source fails.
    pub fn run(mut self) -> Result<RunStats> {
        let mut stats = RunStats {
            passes: 1,
            ..Default::default()
        };
        self.metrics.inc(&self.metrics.stream_passes);

        let outcome = self.drive(&mut stats);
        stats.skipped_lines = self.source.skipped_lines();
        if stats.skipped_lines > 0 {
            warn!("Skipped {} malformed detection line(s)", stats.skipped_lines);
        }
        if let Err(e) = &outcome {
            error!("Frame loop aborted: {:#}", e);
        }

        if self.retire_on_shutdown {
            let retired = self.lifecycle.retire_all(self.last_timestamp_ms, &mut self.bus);
            if !retired.is_empty() {
                info!("Retired {} active vehicle(s) at shutdown", retired.len());
            }
            stats.tracks_retired += retired.len() as u64;
            self.metrics.add(&self.metrics.tracks_retired, retired.len() as u64);
            self.forward_events();
            self.publisher.publish(TrafficSnapshot::capture(
                &self.lifecycle,
                stats.last_frame_id,
            ));
        }

        stats.flushed_on_shutdown = self.gateway.finish();
        outcome.map(|()| stats)
    }

    fn drive(&mut self, stats: &mut RunStats) -> Result<()> {
        let mut frames_this_pass = 0u64;

        loop {
            if self.stop.is_tripped() {
                info!("🛑 Stop requested after {} frame(s)", stats.frames);
                stats.stopped_by_signal = true;
                return Ok(());
            }

            let Some(frame) = self.source.next_frame()? else {
                if !self.should_restart(stats.passes, frames_this_pass) {
                    info!("End of detection stream after {} pass(es)", stats.passes);
                    return Ok(());
                }
                self.source.rewind()?;
                stats.passes += 1;
                frames_this_pass = 0;
                self.metrics.inc(&self.metrics.stream_passes);
                info!("🔁 Restarting detection stream (pass {})", stats.passes);
                continue;
            };

            frames_this_pass += 1;
            self.step(frame, stats);
        }
    }

    fn should_restart(&self, passes: u32, frames_this_pass: u64) -> bool {
        if self.end_of_stream != EndOfStream::Restart {
            return false;
        }
        if frames_this_pass == 0 {
            warn!("Detection stream produced no frames, not restarting");
            return false;
        }
        self.max_passes.map_or(true, |max| passes < max)
    }

    fn step(&mut self, mut frame: Frame, stats: &mut RunStats) {
        let started = Instant::now();

        let rejected = self.filter.apply(&mut frame) as u64;
        let accepted = frame.detections.len() as u64;

        let report = self.lifecycle.process_frame(&frame, &mut self.bus);
        self.last_timestamp_ms = frame.timestamp_ms;
        self.forward_events();
        self.publisher
            .publish(TrafficSnapshot::capture(&self.lifecycle, frame.frame_id));

        stats.frames += 1;
        stats.last_frame_id = frame.frame_id;
        stats.detections_rejected += rejected;
        stats.tracks_created += report.created as u64;
        stats.tracks_retired += report.retired.len() as u64;
        stats.vehicles_counted += report.counted as u64;

        let m = &self.metrics;
        m.inc(&m.total_frames);
        m.add(&m.detections_accepted, accepted);
        m.add(&m.detections_rejected, rejected);
        m.add(&m.tracks_created, report.created as u64);
        m.add(&m.tracks_retired, report.retired.len() as u64);
        m.add(&m.vehicles_counted, report.counted as u64);
        m.set_timing(&m.frame_time_us, started.elapsed().as_micros() as u64);

        for outcome in report.outcomes.iter().filter(|o| o.created) {
            debug!(
                "Frame {}: detection {} opened track {}",
                report.frame_id, outcome.detection_index, outcome.track_id
            );
        }
        debug!(
            "Frame {}: {} detections ({} rejected), {} matched, {} new, {} retired",
            frame.frame_id,
            accepted,
            rejected,
            report.matched,
            report.created,
            report.retired.len()
        );

        if self.progress_every > 0 && stats.frames % self.progress_every == 0 {
            info!(
                "📊 Frame {}: {} active, {} counted, {} spilled, {:.1} fps",
                frame.frame_id,
                self.lifecycle.active_count(),
                self.lifecycle.total_counted(),
                self.gateway.spilled(),
                m.fps()
            );
        }
    }

    fn forward_events(&mut self) {
        let events = self.bus.drain();
        for event in &events {
            if let TrackingEvent::VehicleCounted {
                id,
                total_counted,
                timestamp_ms,
            } = event
            {
                debug!(
                    "Vehicle {} counted at {:.0} ms (total {})",
                    id, timestamp_ms, total_counted
                );
            }
        }
        self.gateway.submit_all(events);
    }
}
