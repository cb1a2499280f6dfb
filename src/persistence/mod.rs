// src/persistence/mod.rs
//
// Storage boundary. The tracking core never talks to a store directly: the
// frame loop hands events to `gateway::PersistenceGateway`, and a worker task
// applies them to a `VehicleStore` off the hot path.

pub mod gateway;
pub mod index;
pub mod journal;
pub mod memory;

pub use gateway::{persistence_channel, PersistenceGateway};
pub use journal::JournalStore;
pub use memory::MemoryStore;

use crate::types::{PersistenceConfig, StoreBackend, TrackId};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub vehicle_id: TrackId,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub max_speed: Option<f64>,
    pub avg_speed: Option<f64>,
    pub total_distance: Option<f64>,
    pub status: VehicleStatus,
}

impl VehicleRecord {
    pub fn new(vehicle_id: TrackId, entry_time: DateTime<Utc>) -> Self {
        Self {
            vehicle_id,
            entry_time,
            exit_time: None,
            max_speed: None,
            avg_speed: None,
            total_distance: None,
            status: VehicleStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == VehicleStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedRecord {
    pub vehicle_id: TrackId,
    pub timestamp: DateTime<Utc>,
    pub speed: f64,
    pub position_x: f32,
    pub position_y: f32,
}

/// Final statistics handed to `close_vehicle`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitStats {
    pub max_speed: f64,
    pub avg_speed: f64,
    pub total_distance: f64,
}

pub trait VehicleStore: Send + Sync {
    /// Record a new active vehicle. A repeated create for a known id is a no-op.
    fn create_vehicle(&self, id: TrackId, entry_time: DateTime<Utc>) -> Result<()>;

    fn record_speed(
        &self,
        id: TrackId,
        timestamp: DateTime<Utc>,
        speed: f64,
        x: f32,
        y: f32,
    ) -> Result<()>;

    /// Finalise a vehicle. Only applies while it is still active; returns
    /// whether anything changed.
    fn close_vehicle(&self, id: TrackId, exit_time: DateTime<Utc>, stats: ExitStats)
        -> Result<bool>;

    /// All vehicles, newest entry first.
    fn list_vehicles(&self) -> Result<Vec<VehicleRecord>>;

    fn list_active_vehicles(&self) -> Result<Vec<VehicleRecord>>;

    /// A vehicle and its speed samples in recording order.
    fn vehicle_history(&self, id: TrackId) -> Result<Option<(VehicleRecord, Vec<SpeedRecord>)>>;

    fn highest_vehicle_id(&self) -> Result<Option<TrackId>>;
}

pub fn open_store(cfg: &PersistenceConfig) -> Result<Arc<dyn VehicleStore>> {
    match cfg.backend {
        StoreBackend::Memory => {
            info!("Using in-memory vehicle store (nothing survives restart)");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Journal => {
            let store = JournalStore::open(&cfg.journal_path)?;
            info!("Using journal vehicle store at {}", store.path().display());
            Ok(Arc::new(store))
        }
    }
}
