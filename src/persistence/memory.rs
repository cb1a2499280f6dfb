// src/persistence/memory.rs

use super::index::VehicleIndex;
use super::{ExitStats, SpeedRecord, VehicleRecord, VehicleStore};
use crate::types::TrackId;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};

/// Ephemeral store, used for tests and runs that need no durable history.
#[derive(Debug, Default)]
pub struct MemoryStore {
    index: Mutex<VehicleIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // index mutations are single calls; a panicking holder leaves no half-applied change
    fn lock(&self) -> MutexGuard<'_, VehicleIndex> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl VehicleStore for MemoryStore {
    fn create_vehicle(&self, id: TrackId, entry_time: DateTime<Utc>) -> Result<()> {
        self.lock().create(id, entry_time);
        Ok(())
    }

    fn record_speed(
        &self,
        id: TrackId,
        timestamp: DateTime<Utc>,
        speed: f64,
        x: f32,
        y: f32,
    ) -> Result<()> {
        self.lock().record_speed(SpeedRecord {
            vehicle_id: id,
            timestamp,
            speed,
            position_x: x,
            position_y: y,
        });
        Ok(())
    }

    fn close_vehicle(
        &self,
        id: TrackId,
        exit_time: DateTime<Utc>,
        stats: ExitStats,
    ) -> Result<bool> {
        Ok(self.lock().close(id, exit_time, stats))
    }

    fn list_vehicles(&self) -> Result<Vec<VehicleRecord>> {
        Ok(self.lock().list())
    }

    fn list_active_vehicles(&self) -> Result<Vec<VehicleRecord>> {
        Ok(self.lock().list_active())
    }

    fn vehicle_history(&self, id: TrackId) -> Result<Option<(VehicleRecord, Vec<SpeedRecord>)>> {
        Ok(self.lock().history(id))
    }

    fn highest_vehicle_id(&self) -> Result<Option<TrackId>> {
        Ok(self.lock().highest_id())
    }
}
