// src/persistence/journal.rs
//
// Durable store: an append-only JSON-lines journal. Every accepted mutation
// is written as one line straight to the file before it is applied to the
// in-memory index; opening the store replays the journal to rebuild that index.

use super::index::VehicleIndex;
use super::{ExitStats, SpeedRecord, VehicleRecord, VehicleStore};
use crate::types::TrackId;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JournalEntry {
    Created {
        vehicle_id: TrackId,
        entry_time: DateTime<Utc>,
    },
    Speed(SpeedRecord),
    Closed {
        vehicle_id: TrackId,
        exit_time: DateTime<Utc>,
        max_speed: f64,
        avg_speed: f64,
        total_distance: f64,
    },
}

struct JournalInner {
    file: File,
    index: VehicleIndex,
}

impl JournalInner {
    /// One unbuffered write per line; a failed append leaves nothing queued.
    fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        Ok(())
    }
}

pub struct JournalStore {
    path: PathBuf,
    inner: Mutex<JournalInner>,
}

impl JournalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let mut index = VehicleIndex::default();
        if path.exists() {
            replay(&path, &mut index)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open journal {}", path.display()))?;

        // Terminate a torn trailing line so the next entry starts clean.
        if !ends_with_newline(&path)? {
            file.write_all(b"\n")?;
        }

        Ok(Self {
            path,
            inner: Mutex::new(JournalInner { file, index }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // the index is only touched after its line is on disk, so it never runs ahead of the journal
    fn lock(&self) -> MutexGuard<'_, JournalInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn replay(path: &Path, index: &mut VehicleIndex) -> Result<()> {
    let file =
        File::open(path).with_context(|| format!("Failed to read journal {}", path.display()))?;
    let mut applied = 0usize;
    let mut skipped = 0usize;

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(&line) {
            Ok(entry) => {
                apply(index, entry);
                applied += 1;
            }
            Err(e) => {
                warn!("Skipping journal line {}: {}", line_no + 1, e);
                skipped += 1;
            }
        }
    }

    info!(
        "Replayed {} journal entries ({} vehicles, {} skipped) from {}",
        applied,
        index.len(),
        skipped,
        path.display()
    );
    Ok(())
}

fn apply(index: &mut VehicleIndex, entry: JournalEntry) {
    match entry {
        JournalEntry::Created {
            vehicle_id,
            entry_time,
        } => {
            index.create(vehicle_id, entry_time);
        }
        JournalEntry::Speed(record) => index.record_speed(record),
        JournalEntry::Closed {
            vehicle_id,
            exit_time,
            max_speed,
            avg_speed,
            total_distance,
        } => {
            let stats = ExitStats {
                max_speed,
                avg_speed,
                total_distance,
            };
            index.close(vehicle_id, exit_time, stats);
        }
    }
}

impl VehicleStore for JournalStore {
    fn create_vehicle(&self, id: TrackId, entry_time: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock();
        if inner.index.contains(id) {
            return Ok(());
        }
        let entry = JournalEntry::Created {
            vehicle_id: id,
            entry_time,
        };
        inner.append(&entry)?;
        apply(&mut inner.index, entry);
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
        let mut inner = self.lock();
        let entry = JournalEntry::Speed(SpeedRecord {
            vehicle_id: id,
            timestamp,
            speed,
            position_x: x,
            position_y: y,
        });
        inner.append(&entry)?;
        apply(&mut inner.index, entry);
        Ok(())
    }

    fn close_vehicle(
        &self,
        id: TrackId,
        exit_time: DateTime<Utc>,
        stats: ExitStats,
    ) -> Result<bool> {
        let mut inner = self.lock();
        if !inner.index.is_active(id) {
            return Ok(false);
        }
        let entry = JournalEntry::Closed {
            vehicle_id: id,
            exit_time,
            max_speed: stats.max_speed,
            avg_speed: stats.avg_speed,
            total_distance: stats.total_distance,
        };
        inner.append(&entry)?;
        apply(&mut inner.index, entry);
        Ok(true)
    }

    fn list_vehicles(&self) -> Result<Vec<VehicleRecord>> {
        Ok(self.lock().index.list())
    }

    fn list_active_vehicles(&self) -> Result<Vec<VehicleRecord>> {
        Ok(self.lock().index.list_active())
    }

    fn vehicle_history(&self, id: TrackId) -> Result<Option<(VehicleRecord, Vec<SpeedRecord>)>> {
        Ok(self.lock().index.history(id))
    }

    fn highest_vehicle_id(&self) -> Result<Option<TrackId>> {
        Ok(self.lock().index.highest_id())
    }
}
