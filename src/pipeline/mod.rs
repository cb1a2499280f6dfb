// src/pipeline/mod.rs

pub mod event_bus;
pub mod metrics;
pub mod orchestrator;
pub mod snapshot;

pub use metrics::PipelineMetrics;
pub use orchestrator::{FrameLoop, StopSignal};
pub use snapshot::{snapshot_channel, SnapshotReader, TrafficSnapshot};
