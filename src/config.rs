use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to the built-in defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.speed.pixels_to_meters > 0.0) {
            bail!("speed.pixels_to_meters must be positive");
        }
        if !(self.speed.max_speed > 0.0) {
            bail!("speed.max_speed must be positive");
        }
        if !(self.tracking.tracking_threshold > 0.0) {
            bail!("tracking.tracking_threshold must be positive");
        }
        if self.counting.line_offset < 0.0 {
            bail!("counting.line_offset must not be negative");
        }
        if !(self.source.fps > 0.0) {
            bail!("source.fps must be positive");
        }
        if self.persistence.queue_capacity == 0 {
            bail!("persistence.queue_capacity must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let mut cfg = Config::default();
        cfg.tracking.tracking_threshold = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_queue() {
        let mut cfg = Config::default();
        cfg.persistence.queue_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = Config::load_or_default("/nonexistent/config.yaml").unwrap();
        assert_eq!(cfg.counting.line_position, 500.0);
    }
}
