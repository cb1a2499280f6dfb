// src/tracking/mod.rs
//
// Vehicle tracking core.
//
// Signal flow per frame:
//   Detections → association → speed (estimate + moving average)
//              → counting_line → lifecycle (create / update / retire)
//
// Orchestrated by lifecycle::LifecycleManager, which owns the registry.

pub mod association;
pub mod counting_line;
pub mod lifecycle;
pub mod speed;
pub mod track;

pub use lifecycle::LifecycleManager;
pub use track::TrackSummary;
