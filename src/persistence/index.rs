// src/persistence/index.rs
//
// In-memory view of the vehicle tables shared by the memory and journal stores.

use super::{ExitStats, SpeedRecord, VehicleRecord, VehicleStatus};
use crate::types::TrackId;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct VehicleIndex {
    vehicles: BTreeMap<TrackId, VehicleRecord>,
    speeds: BTreeMap<TrackId, Vec<SpeedRecord>>,
}

impl VehicleIndex {
    pub fn contains(&self, id: TrackId) -> bool {
        self.vehicles.contains_key(&id)
    }

    pub fn is_active(&self, id: TrackId) -> bool {
        self.vehicles.get(&id).map_or(false, |v| v.is_active())
    }

    /// Returns false when the id is already known.
    pub fn create(&mut self, id: TrackId, entry_time: DateTime<Utc>) -> bool {
        if self.contains(id) {
            return false;
        }
        self.vehicles.insert(id, VehicleRecord::new(id, entry_time));
        true
    }

    pub fn record_speed(&mut self, record: SpeedRecord) {
        self.speeds.entry(record.vehicle_id).or_default().push(record);
    }

    /// Returns false unless the vehicle exists and was still active.
    pub fn close(&mut self, id: TrackId, exit_time: DateTime<Utc>, stats: ExitStats) -> bool {
        match self.vehicles.get_mut(&id) {
            Some(v) if v.is_active() => {
                v.exit_time = Some(exit_time);
                v.max_speed = Some(stats.max_speed);
                v.avg_speed = Some(stats.avg_speed);
                v.total_distance = Some(stats.total_distance);
                v.status = VehicleStatus::Completed;
                true
            }
            _ => false,
        }
    }

    pub fn list(&self) -> Vec<VehicleRecord> {
        let mut all: Vec<VehicleRecord> = self.vehicles.values().cloned().collect();
        all.sort_by(|a, b| {
            b.entry_time
                .cmp(&a.entry_time)
                .then(b.vehicle_id.cmp(&a.vehicle_id))
        });
        all
    }

    pub fn list_active(&self) -> Vec<VehicleRecord> {
        self.vehicles
            .values()
            .filter(|v| v.is_active())
            .cloned()
            .collect()
    }

    pub fn history(&self, id: TrackId) -> Option<(VehicleRecord, Vec<SpeedRecord>)> {
        let record = self.vehicles.get(&id)?.clone();
        let speeds = self.speeds.get(&id).cloned().unwrap_or_default();
        Some((record, speeds))
    }

    pub fn highest_id(&self) -> Option<TrackId> {
        self.vehicles.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }
}
