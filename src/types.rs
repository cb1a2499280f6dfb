use serde::{Deserialize, Serialize};

pub type TrackId = u64;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub speed: SpeedConfig,
    pub tracking: TrackingConfig,
    pub counting: CountingConfig,
    pub source: SourceConfig,
    pub persistence: PersistenceConfig,
    pub pipeline: PipelineConfig,
    pub reporting: ReportingConfig,
    pub logging: LoggingConfig,
}

/// Minimum blob size a bounding box must reach to count as a vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub min_width: i32,
    pub min_height: i32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_width: 80,
            min_height: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedConfig {
    /// Calibration scale: metres per pixel of centroid displacement
    pub pixels_to_meters: f64,
    /// Hard ceiling in km/h; faster readings are clamped, not rejected
    pub max_speed: f64,
    /// Number of raw samples in the moving-average window
    pub history_length: usize,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            pixels_to_meters: 0.1, // 10 px = 1 m
            max_speed: 200.0,
            history_length: 5,
        }
    }
}

/// How detections claim tracks within a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingPolicy {
    /// Every detection independently takes its nearest track. Two detections
    /// may land on the same track; the later one wins.
    Greedy,
    /// A track leaves candidacy for the rest of the frame once claimed.
    Exclusive,
}

impl MatchingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greedy => "greedy",
            Self::Exclusive => "exclusive",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Maximum centroid distance (px) for a detection to continue a track
    pub tracking_threshold: f32,
    pub matching_policy: MatchingPolicy,
    /// Consecutive unmatched frames a track survives. 0 = retire on first miss.
    pub max_missed_frames: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tracking_threshold: 50.0,
            matching_policy: MatchingPolicy::Greedy,
            max_missed_frames: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountingConfig {
    /// Image-space Y coordinate of the counting line
    pub line_position: f32,
    /// Half-height of the band around the line
    pub line_offset: f32,
}

impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            line_position: 500.0,
            line_offset: 6.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndOfStream {
    Stop,
    Restart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Detection log file, or a directory walked for `*.jsonl` / `*.ndjson`
    pub path: String,
    /// Used to stamp frames whose log line carries no `timestamp_ms`
    pub fps: f64,
    pub end_of_stream: EndOfStream,
    /// Upper bound on passes over the stream when restarting. None = forever.
    pub max_passes: Option<u32>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: "detections".to_string(),
            fps: 30.0,
            end_of_stream: EndOfStream::Stop,
            max_passes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Journal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: StoreBackend,
    pub journal_path: String,
    /// Capacity of the queue between the frame loop and the store worker
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Journal,
            journal_path: "output/vehicles.jsonl".to_string(),
            queue_capacity: 1024,
            max_retries: 3,
            retry_backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Retire every active track when the loop stops, so final stats are stored
    pub retire_on_shutdown: bool,
    /// Log a progress line every N frames (0 disables)
    pub progress_every_frames: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retire_on_shutdown: true,
            progress_every_frames: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub interval_secs: u64,
    /// When set, every report also writes the snapshot JSON to this path
    pub snapshot_path: Option<String>,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            snapshot_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "vehicle_speed_tracker=info".to_string(),
        }
    }
}

// ============================================================================
// GEOMETRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned box in integer pixels, top-left anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Centre with integer halving, matching contour-rectangle conventions.
    /// Summed in i64 so boxes near the i32 limits cannot overflow.
    pub fn centroid(&self) -> Point {
        let cx = i64::from(self.x) + i64::from(self.width / 2);
        let cy = i64::from(self.y) + i64::from(self.height / 2);
        Point::new(cx as f32, cy as f32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            bbox: BoundingBox::new(x, y, width, height),
        }
    }

    /// Detection whose box is centred on `(cx, cy)`.
    #[cfg(test)]
    pub fn centered_at(cx: i32, cy: i32, width: i32, height: i32) -> Self {
        Self::new(cx - width / 2, cy - height / 2, width, height)
    }

    pub fn centroid(&self) -> Point {
        self.bbox.centroid()
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_id: u64,
    /// Stream clock in milliseconds
    pub timestamp_ms: f64,
    pub detections: Vec<Detection>,
}

impl Frame {
    pub fn new(frame_id: u64, timestamp_ms: f64, detections: Vec<Detection>) -> Self {
        Self {
            frame_id,
            timestamp_ms,
            detections,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
