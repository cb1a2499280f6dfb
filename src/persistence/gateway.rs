// src/persistence/gateway.rs
//
// Decouples the frame loop from storage I/O.
//
//   frame loop ──try_send──▶ bounded mpsc ──▶ PersistenceWorker ──▶ VehicleStore
//        └─ spill (FIFO) when the channel is full, drained first next time
//
// The frame loop never blocks and never drops an event while the worker is
// alive; events reach the store in the order they were submitted. Store
// failures are retried with exponential backoff and then logged.

use super::{ExitStats, VehicleStore};
use crate::pipeline::event_bus::TrackingEvent;
use crate::pipeline::metrics::PipelineMetrics;
use crate::types::PersistenceConfig;
use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &PersistenceConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            backoff: Duration::from_millis(cfg.retry_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

pub fn persistence_channel(
    cfg: &PersistenceConfig,
    store: Arc<dyn VehicleStore>,
    metrics: PipelineMetrics,
) -> (PersistenceGateway, PersistenceWorker) {
    let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
    let gateway = PersistenceGateway {
        tx,
        spill: VecDeque::new(),
        metrics: metrics.clone(),
    };
    let worker = PersistenceWorker {
        rx,
        store,
        retry: RetryPolicy::from_config(cfg),
        metrics,
    };
    (gateway, worker)
}

/// Producer half, owned by the frame loop.
pub struct PersistenceGateway {
    tx: mpsc::Sender<TrackingEvent>,
    spill: VecDeque<TrackingEvent>,
    metrics: PipelineMetrics,
}

impl PersistenceGateway {
    pub fn submit(&mut self, event: TrackingEvent) {
        if !event.is_persistent() {
            return;
        }

        self.drain_spill();
        if !self.spill.is_empty() {
            self.push_spill(event);
            return;
        }

        match self.tx.try_send(event) {
            Ok(()) => self.metrics.inc(&self.metrics.events_queued),
            Err(TrySendError::Full(event)) => self.push_spill(event),
            Err(TrySendError::Closed(event)) => self.report_closed(&event),
        }
    }

    pub fn submit_all(&mut self, events: impl IntoIterator<Item = TrackingEvent>) {
        for event in events {
            self.submit(event);
        }
    }

    pub fn spilled(&self) -> usize {
        self.spill.len()
    }

    /// Hand over everything still spilled, waiting for queue space, and close
    /// the channel. Blocks the calling thread: call from the frame-loop
    /// thread, never from inside an async task.
    pub fn finish(mut self) -> usize {
        let pending = self.spill.len();
        if pending > 0 {
            info!("Flushing {} spilled persistence event(s)", pending);
        }
        while let Some(event) = self.spill.pop_front() {
            match self.tx.blocking_send(event) {
                Ok(()) => self.metrics.inc(&self.metrics.events_queued),
                Err(mpsc::error::SendError(event)) => self.report_closed(&event),
            }
        }
        pending
    }

    fn drain_spill(&mut self) {
        while let Some(event) = self.spill.pop_front() {
            match self.tx.try_send(event) {
                Ok(()) => self.metrics.inc(&self.metrics.events_queued),
                Err(TrySendError::Full(event)) => {
                    self.spill.push_front(event);
                    break;
                }
                Err(TrySendError::Closed(event)) => self.report_closed(&event),
            }
        }
    }

    fn push_spill(&mut self, event: TrackingEvent) {
        if self.spill.is_empty() {
            warn!("Persistence queue full, spilling events until the store catches up");
        }
        self.spill.push_back(event);
        self.metrics.inc(&self.metrics.events_spilled);
    }

    fn report_closed(&self, event: &TrackingEvent) {
        error!(
            "Persistence worker stopped; lost {} for vehicle {}",
            event.kind(),
            event.vehicle_id()
        );
        self.metrics.inc(&self.metrics.events_failed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub persisted: u64,
    pub retries: u64,
    pub failed: u64,
}

/// Consumer half. Runs until every gateway sender is gone and the queue is empty.
pub struct PersistenceWorker {
    rx: mpsc::Receiver<TrackingEvent>,
    store: Arc<dyn VehicleStore>,
    retry: RetryPolicy,
    metrics: PipelineMetrics,
}

impl PersistenceWorker {
    pub async fn run(mut self) -> WorkerStats {
        let mut stats = WorkerStats::default();

        while let Some(event) = self.rx.recv().await {
            let mut attempt = 0u32;
            loop {
                match self.apply(&event).await {
                    Ok(()) => {
                        stats.persisted += 1;
                        self.metrics.inc(&self.metrics.events_persisted);
                        break;
                    }
                    Err(e) if attempt < self.retry.max_retries => {
                        attempt += 1;
                        stats.retries += 1;
                        self.metrics.inc(&self.metrics.persistence_retries);
                        let delay = self.retry.delay(attempt);
                        warn!(
                            "Store write failed for {} of vehicle {} (attempt {}/{}), retrying in {:?}: {:#}",
                            event.kind(),
                            event.vehicle_id(),
                            attempt,
                            self.retry.max_retries,
                            delay,
                            e
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => {
                        stats.failed += 1;
                        self.metrics.inc(&self.metrics.events_failed);
                        error!(
                            "Giving up on {} for vehicle {}: {:#}",
                            event.kind(),
                            event.vehicle_id(),
                            e
                        );
                        break;
                    }
                }
            }
        }

        info!(
            "Persistence worker done: {} persisted, {} retries, {} failed",
            stats.persisted, stats.retries, stats.failed
        );
        stats
    }

    async fn apply(&self, event: &TrackingEvent) -> Result<()> {
        let store = Arc::clone(&self.store);
        let event = event.clone();
        tokio::task::spawn_blocking(move || apply_event(store.as_ref(), &event))
            .await
            .map_err(|e| anyhow!("store task aborted: {}", e))?
    }
}

pub fn apply_event(store: &dyn VehicleStore, event: &TrackingEvent) -> Result<()> {
    match event {
        TrackingEvent::VehicleEntered { id, entry_time, .. } => {
            store.create_vehicle(*id, *entry_time)
        }
        TrackingEvent::SpeedRecorded {
            id,
            recorded_at,
            speed_kmh,
            position,
            ..
        } => store.record_speed(*id, *recorded_at, *speed_kmh, position.x, position.y),
        TrackingEvent::VehicleExited { exit_time, summary } => {
            let stats = ExitStats {
                max_speed: summary.max_speed,
                avg_speed: summary.average_speed,
                total_distance: summary.total_distance,
            };
            if !store.close_vehicle(summary.id, *exit_time, stats)? {
                debug!("Vehicle {} already closed, ignoring duplicate exit", summary.id);
            }
            Ok(())
        }
        TrackingEvent::VehicleCounted { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryStore, SpeedRecord, VehicleRecord, VehicleStatus};
    use crate::tracking::track::{TrackStatus, TrackSummary};
    use crate::types::{Point, TrackId};
    use anyhow::bail;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cfg(capacity: usize, max_retries: u32) -> PersistenceConfig {
        PersistenceConfig {
            queue_capacity: capacity,
            max_retries,
            retry_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn entered(id: TrackId) -> TrackingEvent {
        TrackingEvent::VehicleEntered {
            id,
            entry_time: Utc::now(),
            timestamp_ms: 0.0,
            position: Point::new(0.0, 0.0),
        }
    }

    fn speed(id: TrackId, kmh: f64) -> TrackingEvent {
        TrackingEvent::SpeedRecorded {
            id,
            recorded_at: Utc::now(),
            timestamp_ms: 0.0,
            speed_kmh: kmh,
            position: Point::new(10.0, 20.0),
        }
    }

    fn exited(id: TrackId, max: f64) -> TrackingEvent {
        TrackingEvent::VehicleExited {
            exit_time: Utc::now(),
            summary: TrackSummary {
                id,
                status: TrackStatus::Completed,
                max_speed: max,
                average_speed: max / 2.0,
                total_distance: 3.0,
                speed_sample_count: 2,
                counted: false,
                first_seen_ms: 0.0,
                last_seen_ms: 66.0,
                exited_ms: 99.0,
            },
        }
    }

    /// Fails the first `failures` calls, then delegates.
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures: AtomicU32::new(failures),
            }
        }

        fn trip(&self) -> Result<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                bail!("connection reset");
            }
            Ok(())
        }
    }

    impl VehicleStore for FlakyStore {
        fn create_vehicle(&self, id: TrackId, entry_time: DateTime<Utc>) -> Result<()> {
            self.trip()?;
            self.inner.create_vehicle(id, entry_time)
        }
        fn record_speed(&self, id: TrackId, ts: DateTime<Utc>, s: f64, x: f32, y: f32) -> Result<()> {
            self.trip()?;
            self.inner.record_speed(id, ts, s, x, y)
        }
        fn close_vehicle(&self, id: TrackId, t: DateTime<Utc>, stats: ExitStats) -> Result<bool> {
            self.trip()?;
            self.inner.close_vehicle(id, t, stats)
        }
        fn list_vehicles(&self) -> Result<Vec<VehicleRecord>> {
            self.inner.list_vehicles()
        }
        fn list_active_vehicles(&self) -> Result<Vec<VehicleRecord>> {
            self.inner.list_active_vehicles()
        }
        fn vehicle_history(&self, id: TrackId) -> Result<Option<(VehicleRecord, Vec<SpeedRecord>)>> {
            self.inner.vehicle_history(id)
        }
        fn highest_vehicle_id(&self) -> Result<Option<TrackId>> {
            self.inner.highest_vehicle_id()
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(12), MAX_BACKOFF);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_events_reach_store_in_order() {
        let store = Arc::new(MemoryStore::new());
        let (mut gateway, worker) = persistence_channel(&cfg(4, 0), store.clone(), PipelineMetrics::new());
        let handle = tokio::spawn(worker.run());

        gateway.submit(entered(1));
        gateway.submit(speed(1, 20.0));
        gateway.submit(speed(1, 30.0));
        gateway.submit(exited(1, 30.0));
        gateway.submit(exited(1, 99.0));
        tokio::task::spawn_blocking(move || gateway.finish()).await.unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(stats.persisted, 5);
        let (record, speeds) = store.vehicle_history(1).unwrap().unwrap();
        assert_eq!(record.status, VehicleStatus::Completed);
        assert_eq!(record.max_speed, Some(30.0));
        let values: Vec<f64> = speeds.iter().map(|s| s.speed).collect();
        assert_eq!(values, vec![20.0, 30.0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_queue_spills_without_loss() {
        let store = Arc::new(MemoryStore::new());
        let metrics = PipelineMetrics::new();
        let (mut gateway, worker) = persistence_channel(&cfg(1, 0), store.clone(), metrics.clone());

        // worker not running yet: only one event fits in the channel
        gateway.submit(entered(1));
        for i in 0..5 {
            gateway.submit(speed(1, i as f64));
        }
        assert_eq!(gateway.spilled(), 5);

        let handle = tokio::spawn(worker.run());
        let flushed = tokio::task::spawn_blocking(move || gateway.finish()).await.unwrap();
        assert_eq!(flushed, 5);

        let stats = handle.await.unwrap();
        assert_eq!(stats.persisted, 6);
        let (_, speeds) = store.vehicle_history(1).unwrap().unwrap();
        let values: Vec<f64> = speeds.iter().map(|s| s.speed).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(metrics.summary().events_spilled, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transient_failures_are_retried() {
        let store = Arc::new(FlakyStore::new(2));
        let (mut gateway, worker) = persistence_channel(&cfg(8, 3), store.clone(), PipelineMetrics::new());
        let handle = tokio::spawn(worker.run());

        gateway.submit(entered(7));
        tokio::task::spawn_blocking(move || gateway.finish()).await.unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(store.list_active_vehicles().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_exhausted_retries_do_not_block_later_events() {
        let store = Arc::new(FlakyStore::new(1));
        let (mut gateway, worker) = persistence_channel(&cfg(8, 0), store.clone(), PipelineMetrics::new());
        let handle = tokio::spawn(worker.run());

        gateway.submit(entered(1));
        gateway.submit(entered(2));
        tokio::task::spawn_blocking(move || gateway.finish()).await.unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.persisted, 1);
        let ids: Vec<TrackId> = store
            .list_vehicles()
            .unwrap()
            .iter()
            .map(|v| v.vehicle_id)
            .collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_counted_events_are_not_queued() {
        let store = Arc::new(MemoryStore::new());
        let metrics = PipelineMetrics::new();
        let (mut gateway, _worker) = persistence_channel(&cfg(4, 0), store, metrics.clone());
        gateway.submit(TrackingEvent::VehicleCounted {
            id: 1,
            total_counted: 1,
            timestamp_ms: 0.0,
        });
        assert_eq!(metrics.summary().events_queued, 0);
    }
}
