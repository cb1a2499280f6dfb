// src/main.rs

mod config;
mod persistence;
mod pipeline;
mod source;
mod tracking;
mod types;

use anyhow::{Context, Result};
use persistence::{persistence_channel, VehicleStore};
use pipeline::{snapshot_channel, FrameLoop, PipelineMetrics, SnapshotReader, StopSignal, TrafficSnapshot};
use source::DetectionLogSource;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracking::LifecycleManager;
use types::{Config, ReportingConfig};

/// How many of the most recent vehicles to list in the final summary
const SUMMARY_RECENT_VEHICLES: usize = 5;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚗 Vehicle Speed Tracker Starting");
    if Path::new(&config_path).exists() {
        info!("✓ Configuration loaded from {}", config_path);
    } else {
        warn!("{} not found, running with built-in defaults", config_path);
    }

    info!(
        "Speed: {} m/px, max {:.0} km/h, smoothing over {} samples",
        config.speed.pixels_to_meters, config.speed.max_speed, config.speed.history_length
    );
    info!(
        "Tracking: threshold {:.0}px, {} matching, {} missed frame(s) tolerated",
        config.tracking.tracking_threshold,
        config.tracking.matching_policy.as_str(),
        config.tracking.max_missed_frames
    );
    info!(
        "Counting line: y={:.0} ±{:.0}, min vehicle {}x{}",
        config.counting.line_position,
        config.counting.line_offset,
        config.detection.min_width,
        config.detection.min_height
    );

    let store = persistence::open_store(&config.persistence)?;
    let first_id = store.highest_vehicle_id()?.map_or(1, |id| id + 1);
    if first_id > 1 {
        info!("Resuming vehicle ids at {}", first_id);
    }
    let stale = store.list_active_vehicles()?;
    if !stale.is_empty() {
        warn!(
            "{} vehicle(s) left active by a previous run will stay open",
            stale.len()
        );
    }

    let source = DetectionLogSource::open(&config.source)?;
    info!("✓ Detection source ready: {}", config.source.path);

    let metrics = PipelineMetrics::new();
    let stop = StopSignal::new();
    let (gateway, worker) = persistence_channel(&config.persistence, store.clone(), metrics.clone());
    let (publisher, reader) = snapshot_channel();

    let worker_handle = tokio::spawn(worker.run());

    {
        let stop = stop.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, stopping after the current frame");
                    stop.trip();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    }

    let reporter = tokio::spawn(report_loop(
        config.reporting.clone(),
        reader.clone(),
        metrics.clone(),
    ));

    let lifecycle = LifecycleManager::from_config(&config).with_first_id(first_id);
    let frame_loop = FrameLoop::new(
        &config,
        Box::new(source),
        lifecycle,
        gateway,
        publisher,
        metrics.clone(),
        stop,
    );

    let run_result = tokio::task::spawn_blocking(move || frame_loop.run())
        .await
        .context("Frame loop panicked")?;
    reporter.abort();

    let worker_stats = worker_handle
        .await
        .context("Persistence worker panicked")?;
    report(&config.reporting, &reader.current(), &metrics);

    let stats = run_result?;

    info!("\n✓ Run complete!");
    info!("  Frames processed: {} ({} pass(es))", stats.frames, stats.passes);
    info!("  🆕 Vehicles tracked: {}", stats.tracks_created);
    info!("  🏁 Vehicles retired: {}", stats.tracks_retired);
    info!("  🔢 Vehicles counted: {}", stats.vehicles_counted);
    info!("  Detections below minimum size: {}", stats.detections_rejected);
    if stats.skipped_lines > 0 {
        info!("  Malformed detection lines skipped: {}", stats.skipped_lines);
    }
    if stats.stopped_by_signal {
        info!("  Stopped by signal");
    }
    info!(
        "  💾 Events persisted: {} ({} retries, {} failed, {} flushed at shutdown)",
        worker_stats.persisted, worker_stats.retries, worker_stats.failed, stats.flushed_on_shutdown
    );

    print_store_summary(store.as_ref())?;

    let summary = metrics.summary();
    info!("  Average: {:.1} fps over {:.1}s", summary.fps, summary.elapsed_secs);
    debug!("Metrics: {}", serde_json::to_string(&summary)?);

    Ok(())
}

async fn report_loop(cfg: ReportingConfig, reader: SnapshotReader, metrics: PipelineMetrics) {
    if cfg.interval_secs == 0 {
        return;
    }
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs));
    // first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        report(&cfg, &reader.current(), &metrics);
    }
}

fn report(cfg: &ReportingConfig, snapshot: &TrafficSnapshot, metrics: &PipelineMetrics) {
    info!(
        "📈 Frame {}: {} active, {} counted, {:.1} fps",
        snapshot.frame_id,
        snapshot.active_count,
        snapshot.total_count,
        metrics.fps()
    );
    for (id, speed) in &snapshot.vehicles {
        debug!("   Vehicle_{}: {:.1} km/h", id, speed);
    }

    if let Some(path) = &cfg.snapshot_path {
        if let Err(e) = write_snapshot(path, snapshot) {
            warn!("Failed to write snapshot: {:#}", e);
        }
    }
}

fn write_snapshot(path: &str, snapshot: &TrafficSnapshot) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path))?;
    Ok(())
}

fn print_store_summary(store: &dyn VehicleStore) -> Result<()> {
    let vehicles = store.list_vehicles()?;
    let active = vehicles.iter().filter(|v| v.is_active()).count();
    info!("  Store holds {} vehicle(s), {} active", vehicles.len(), active);

    for record in vehicles.iter().take(SUMMARY_RECENT_VEHICLES) {
        let samples = store
            .vehicle_history(record.vehicle_id)?
            .map_or(0, |(_, speeds)| speeds.len());
        info!(
            "   Vehicle_{}: max {:.1} km/h, avg {:.1} km/h, {:.1} m, {} samples",
            record.vehicle_id,
            record.max_speed.unwrap_or(0.0),
            record.avg_speed.unwrap_or(0.0),
            record.total_distance.unwrap_or(0.0),
            samples
        );
    }
    Ok(())
}
