// src/source.rs
//
// Detection ingestion. Frames arrive as JSON lines, one frame per line:
//
//   {"timestamp_ms": 33.3, "boxes": [[x, y, w, h], ...]}
//
// `timestamp_ms` is optional; without it the frame is stamped from its index
// and the configured fps. A directory is walked for `*.jsonl` / `*.ndjson`
// files, which are read in path order as one stream.

use crate::types::{Detection, DetectionConfig, Frame, SourceConfig};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const LOG_EXTENSIONS: [&str; 2] = ["jsonl", "ndjson"];

pub trait DetectionSource {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Start the stream over. Frame ids keep increasing.
    fn rewind(&mut self) -> Result<()>;

    /// Input lines dropped as undecodable so far.
    fn skipped_lines(&self) -> u64 {
        0
    }
}

#[derive(Debug, Deserialize)]
struct FrameLine {
    #[serde(default)]
    timestamp_ms: Option<f64>,
    #[serde(default)]
    boxes: Vec<[i32; 4]>,
}

pub fn find_detection_logs(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        bail!("Detection source {} does not exist", root.display());
    }

    let mut logs: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| {
                    LOG_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
                })
        })
        .collect();
    logs.sort();

    info!("Found {} detection log(s) under {}", logs.len(), root.display());
    Ok(logs)
}

pub struct DetectionLogSource {
    files: Vec<PathBuf>,
    file_idx: usize,
    reader: Option<BufReader<File>>,
    line_no: usize,
    frame_period_ms: f64,
    /// Frames read in the current pass; drives the fps fallback clock
    pass_frame_index: u64,
    next_frame_id: u64,
    /// Added to every timestamp after a rewind so the clock keeps moving forward
    clock_offset_ms: f64,
    last_timestamp_ms: f64,
    skipped_lines: u64,
}

impl DetectionLogSource {
    pub fn open(cfg: &SourceConfig) -> Result<Self> {
        let files = find_detection_logs(Path::new(&cfg.path))?;
        if files.is_empty() {
            bail!("No detection logs found in {}", cfg.path);
        }
        Ok(Self::from_files(files, cfg.fps))
    }

    pub fn from_files(files: Vec<PathBuf>, fps: f64) -> Self {
        let fps = if fps > 0.0 { fps } else { 30.0 };
        Self {
            files,
            file_idx: 0,
            reader: None,
            line_no: 0,
            frame_period_ms: 1000.0 / fps,
            pass_frame_index: 0,
            next_frame_id: 1,
            clock_offset_ms: 0.0,
            last_timestamp_ms: 0.0,
            skipped_lines: 0,
        }
    }

    fn current_path(&self) -> Option<&Path> {
        self.files.get(self.file_idx).map(PathBuf::as_path)
    }

    fn skip_line(&mut self, reason: &dyn fmt::Display) {
        self.skipped_lines += 1;
        warn!(
            "Skipping malformed detection line {}:{}: {}",
            self.current_path()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            self.line_no,
            reason
        );
    }

    fn build_frame(&mut self, line: FrameLine) -> Frame {
        let base = line
            .timestamp_ms
            .unwrap_or(self.pass_frame_index as f64 * self.frame_period_ms);
        let timestamp_ms = self.clock_offset_ms + base;

        let detections = line
            .boxes
            .iter()
            .map(|[x, y, w, h]| Detection::new(*x, *y, *w, *h))
            .collect();

        let frame = Frame::new(self.next_frame_id, timestamp_ms, detections);
        self.next_frame_id += 1;
        self.pass_frame_index += 1;
        self.last_timestamp_ms = timestamp_ms;
        frame
    }
}

impl DetectionSource for DetectionLogSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if self.reader.is_none() {
                let Some(path) = self.current_path() else {
                    return Ok(None);
                };
                let file = File::open(path)
                    .with_context(|| format!("Failed to open detection log {}", path.display()))?;
                debug!("Reading detections from {}", path.display());
                self.reader = Some(BufReader::new(file));
                self.line_no = 0;
            }

            let mut raw = Vec::new();
            let read = match self.reader.as_mut() {
                Some(reader) => reader.read_until(b'\n', &mut raw)?,
                None => 0,
            };
            if read == 0 {
                self.reader = None;
                self.file_idx += 1;
                continue;
            }
            self.line_no += 1;

            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(e) => {
                    self.skip_line(&e);
                    continue;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<FrameLine>(trimmed) {
                Ok(parsed) => return Ok(Some(self.build_frame(parsed))),
                Err(e) => self.skip_line(&e),
            }
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.file_idx = 0;
        self.reader = None;
        self.line_no = 0;
        self.pass_frame_index = 0;
        self.clock_offset_ms = self.last_timestamp_ms + self.frame_period_ms;
        Ok(())
    }

    fn skipped_lines(&self) -> u64 {
        self.skipped_lines
    }
}

/// Drops detections below the minimum vehicle size.
#[derive(Debug, Clone, Copy)]
pub struct MinSizeFilter {
    pub min_width: i32,
    pub min_height: i32,
}

impl MinSizeFilter {
    pub fn from_config(cfg: &DetectionConfig) -> Self {
        Self {
            min_width: cfg.min_width,
            min_height: cfg.min_height,
        }
    }

    pub fn accepts(&self, det: &Detection) -> bool {
        det.bbox.width >= self.min_width && det.bbox.height >= self.min_height
    }

    /// Filters the frame in place and returns how many detections were dropped.
    pub fn apply(&self, frame: &mut Frame) -> usize {
        let before = frame.detections.len();
        frame.detections.retain(|d| self.accepts(d));
        before - frame.detections.len()
    }
}

/// Fixed list of frames, replayed on rewind.
#[cfg(test)]
pub struct ScriptedSource {
    frames: Vec<Frame>,
    cursor: usize,
}

#[cfg(test)]
impl ScriptedSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames, cursor: 0 }
    }
}

#[cfg(test)]
impl DetectionSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = self.frames.get(self.cursor).cloned();
        if frame.is_some() {
            self.cursor += 1;
        }
        Ok(frame)
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vst-src-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_log(path: &Path, lines: &[&str]) {
        let mut f = File::create(path).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
    }

    fn drain(source: &mut impl DetectionSource) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_reads_boxes_and_falls_back_to_fps_clock() {
        let dir = temp_dir();
        let path = dir.join("cam.jsonl");
        write_log(
            &path,
            &[
                r#"{"boxes": [[60, 60, 80, 80]]}"#,
                r#"{"boxes": []}"#,
                r#"{"timestamp_ms": 500.0, "boxes": [[64, 63, 80, 80], [300, 460, 90, 85]]}"#,
            ],
        );

        let mut source = DetectionLogSource::from_files(vec![path], 10.0);
        let frames = drain(&mut source);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].frame_id, 1);
        assert_eq!(frames[0].timestamp_ms, 0.0);
        assert_eq!(frames[0].detections[0].centroid().x, 100.0);
        assert_eq!(frames[1].timestamp_ms, 100.0);
        assert!(frames[1].is_empty());
        assert_eq!(frames[2].timestamp_ms, 500.0);
        assert_eq!(frames[2].detections.len(), 2);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = temp_dir();
        let path = dir.join("cam.jsonl");
        write_log(
            &path,
            &[
                r#"{"boxes": [[0, 0, 80, 80]]}"#,
                "not json",
                r#"{"boxes": [[1, 2, 3]]}"#,
                "",
                r#"{"boxes": [[5, 5, 80, 80]]}"#,
            ],
        );

        let mut source = DetectionLogSource::from_files(vec![path], 30.0);
        let frames = drain(&mut source);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].frame_id, 2);
        assert_eq!(source.skipped_lines(), 2);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let dir = temp_dir();
        let path = dir.join("cam.jsonl");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"{\"boxes\": [[0, 0, 80, 80]]}\n");
        bytes.extend_from_slice(b"{\"boxes\": [[1, 1, 80, 80]]}\xff\xfe\n");
        bytes.extend_from_slice(b"{\"boxes\": [[9, 9, 80, 80]]}\n");
        fs::write(&path, bytes).unwrap();

        let mut source = DetectionLogSource::from_files(vec![path], 30.0);
        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.detections[0].bbox.x, 0);
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.frame_id, 2);
        assert_eq!(second.detections[0].bbox.x, 9);
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.skipped_lines(), 1);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_extreme_coordinates_yield_finite_centroids() {
        let dir = temp_dir();
        let path = dir.join("cam.jsonl");
        write_log(
            &path,
            &[
                r#"{"boxes": [[2147483600, 10, 200, 90]]}"#,
                r#"{"boxes": [[-2147483648, -2147483648, 100, 100]]}"#,
                r#"{"boxes": [[0, 0, 2147483648, 80]]}"#,
            ],
        );

        let mut source = DetectionLogSource::from_files(vec![path], 30.0);
        let frames = drain(&mut source);
        // the out-of-range width does not fit an i32
        assert_eq!(frames.len(), 2);
        assert_eq!(source.skipped_lines(), 1);

        let filter = MinSizeFilter::from_config(&DetectionConfig::default());
        for mut frame in frames {
            assert_eq!(filter.apply(&mut frame), 0);
            let c = frame.detections[0].centroid();
            assert!(c.x.is_finite() && c.y.is_finite());
        }

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_directory_is_one_sorted_stream() {
        let dir = temp_dir();
        fs::create_dir_all(dir.join("b")).unwrap();
        write_log(&dir.join("b").join("part2.ndjson"), &[r#"{"boxes": [[2, 0, 80, 80]]}"#]);
        write_log(&dir.join("a.jsonl"), &[r#"{"boxes": [[1, 0, 80, 80]]}"#]);
        write_log(&dir.join("notes.txt"), &["ignored"]);

        let files = find_detection_logs(&dir).unwrap();
        assert_eq!(files.len(), 2);

        let mut source = DetectionLogSource::from_files(files, 30.0);
        let xs: Vec<i32> = drain(&mut source)
            .iter()
            .map(|f| f.detections[0].bbox.x)
            .collect();
        assert_eq!(xs, vec![1, 2]);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_rewind_keeps_ids_and_clock_increasing() {
        let dir = temp_dir();
        let path = dir.join("loop.jsonl");
        write_log(&path, &[r#"{"boxes": []}"#, r#"{"boxes": []}"#]);

        let mut source = DetectionLogSource::from_files(vec![path], 10.0);
        let first = drain(&mut source);
        source.rewind().unwrap();
        let second = drain(&mut source);

        assert_eq!(second.len(), 2);
        assert_eq!(second[0].frame_id, 3);
        assert!(second[0].timestamp_ms > first[1].timestamp_ms);
        assert_eq!(second[0].timestamp_ms, 200.0);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let missing = std::env::temp_dir().join(format!("vst-missing-{}", uuid::Uuid::new_v4()));
        assert!(find_detection_logs(&missing).is_err());
    }

    #[test]
    fn test_min_size_filter() {
        let filter = MinSizeFilter::from_config(&DetectionConfig::default());
        let mut frame = Frame::new(
            1,
            0.0,
            vec![
                Detection::new(0, 0, 80, 80),
                Detection::new(0, 0, 79, 200),
                Detection::new(0, 0, 200, 60),
            ],
        );
        assert_eq!(filter.apply(&mut frame), 2);
        assert_eq!(frame.detections.len(), 1);
    }
}
