// src/pipeline/event_bus.rs
//
// Per-frame event buffer. The lifecycle manager publishes what happened to
// its tracks; the frame loop drains the buffer once per frame and hands the
// events to persistence in publication order.

use crate::tracking::TrackSummary;
use crate::types::{Point, TrackId};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone)]
pub enum TrackingEvent {
    VehicleEntered {
        id: TrackId,
        entry_time: DateTime<Utc>,
        timestamp_ms: f64,
        position: Point,
    },

    SpeedRecorded {
        id: TrackId,
        recorded_at: DateTime<Utc>,
        timestamp_ms: f64,
        speed_kmh: f64,
        position: Point,
    },

    VehicleCounted {
        id: TrackId,
        total_counted: u64,
        timestamp_ms: f64,
    },

    VehicleExited {
        exit_time: DateTime<Utc>,
        summary: TrackSummary,
    },
}

impl TrackingEvent {
    pub fn vehicle_id(&self) -> TrackId {
        match self {
            Self::VehicleEntered { id, .. }
            | Self::SpeedRecorded { id, .. }
            | Self::VehicleCounted { id, .. } => *id,
            Self::VehicleExited { summary, .. } => summary.id,
        }
    }

    /// Whether the store has anything to record for this event.
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Self::VehicleCounted { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::VehicleEntered { .. } => "vehicle_entered",
            Self::SpeedRecorded { .. } => "speed_recorded",
            Self::VehicleCounted { .. } => "vehicle_counted",
            Self::VehicleExited { .. } => "vehicle_exited",
        }
    }
}

pub struct EventBus {
    events: VecDeque<TrackingEvent>,
    high_water: usize,
    warned: bool,
}

impl EventBus {
    /// `high_water` only triggers a warning; events are never dropped.
    pub fn new(high_water: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(high_water.min(1024)),
            high_water,
            warned: false,
        }
    }

    pub fn publish(&mut self, event: TrackingEvent) {
        self.events.push_back(event);
        if self.events.len() > self.high_water && !self.warned {
            warn!(
                "Event bus holding {} undrained events (high water {})",
                self.events.len(),
                self.high_water
            );
            self.warned = true;
        }
    }

    pub fn drain(&mut self) -> Vec<TrackingEvent> {
        self.warned = false;
        self.events.drain(..).collect()
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}
