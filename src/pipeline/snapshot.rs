// src/pipeline/snapshot.rs
//
// Read side for the reporting path. The frame loop publishes a complete,
// immutable snapshot after every frame; readers clone the current Arc.

use crate::tracking::LifecycleManager;
use crate::types::TrackId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrafficSnapshot {
    pub frame_id: u64,
    /// Current smoothed speed (km/h) of every active track
    pub vehicles: BTreeMap<TrackId, f64>,
    pub total_count: u64,
    pub active_count: usize,
}

impl TrafficSnapshot {
    pub fn capture(lifecycle: &LifecycleManager, frame_id: u64) -> Self {
        let vehicles: BTreeMap<TrackId, f64> = lifecycle
            .tracks()
            .filter(|t| t.is_active())
            .map(|t| (t.id, t.current_speed))
            .collect();
        Self {
            frame_id,
            active_count: vehicles.len(),
            vehicles,
            total_count: lifecycle.total_counted(),
        }
    }
}

/// Writer half, owned by the frame loop.
pub struct SnapshotPublisher {
    slot: Arc<RwLock<Arc<TrafficSnapshot>>>,
}

/// Reader half. Cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct SnapshotReader {
    slot: Arc<RwLock<Arc<TrafficSnapshot>>>,
}

pub fn snapshot_channel() -> (SnapshotPublisher, SnapshotReader) {
    let slot = Arc::new(RwLock::new(Arc::new(TrafficSnapshot::default())));
    (
        SnapshotPublisher { slot: slot.clone() },
        SnapshotReader { slot },
    )
}

impl SnapshotPublisher {
    pub fn publish(&self, snapshot: TrafficSnapshot) {
        let next = Arc::new(snapshot);
        // slot only ever holds whole Arcs; poisoning leaves nothing torn
        let mut guard = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *guard = next;
    }
}

impl SnapshotReader {
    pub fn current(&self) -> Arc<TrafficSnapshot> {
        let guard = self.slot.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::event_bus::EventBus;
    use crate::types::{Config, Detection, Frame};
    use std::thread;

    #[test]
    fn test_capture_reflects_active_tracks() {
        let mut mgr = LifecycleManager::from_config(&Config::default());
        let mut bus = EventBus::new(64);
        let dets = vec![
            Detection::centered_at(100, 100, 80, 80),
            Detection::centered_at(300, 500, 80, 80),
        ];
        mgr.process_frame(&Frame::new(1, 0.0, dets), &mut bus);
        let dets = vec![Detection::centered_at(104, 103, 80, 80)];
        mgr.process_frame(&Frame::new(2, 1000.0, dets), &mut bus);

        let snap = TrafficSnapshot::capture(&mgr, 2);
        assert_eq!(snap.active_count, 1);
        assert_eq!(snap.total_count, 1);
        assert!((snap.vehicles[&1] - 1.8).abs() < 1e-6);
        assert!(!snap.vehicles.contains_key(&2));
    }

    #[test]
    fn test_serializes_with_query_field_names() {
        let mut snap = TrafficSnapshot::default();
        snap.vehicles.insert(7, 42.5);
        snap.total_count = 3;
        snap.active_count = 1;
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["vehicles"]["7"], 42.5);
        assert_eq!(json["total_count"], 3);
        assert_eq!(json["active_count"], 1);
    }

    #[test]
    fn test_readers_only_see_whole_snapshots() {
        let (publisher, reader) = snapshot_channel();
        let handle = thread::spawn(move || {
            for _ in 0..2000 {
                let snap = reader.current();
                assert_eq!(snap.active_count, snap.vehicles.len());
                assert_eq!(snap.frame_id as usize, snap.vehicles.len());
            }
        });

        for frame_id in 0..500u64 {
            let vehicles: BTreeMap<TrackId, f64> = (0..frame_id).map(|id| (id, 10.0)).collect();
            publisher.publish(TrafficSnapshot {
                frame_id,
                active_count: vehicles.len(),
                vehicles,
                total_count: frame_id,
            });
        }
        handle.join().unwrap();
    }
}
