// src/tracking/counting_line.rs

use crate::types::CountingConfig;

/// Horizontal band `[position - offset, position + offset]` in image space.
/// Direction-insensitive: a centroid inside the band counts regardless of
/// which side it came from.
#[derive(Debug, Clone, Copy)]
pub struct CountingLine {
    position: f32,
    offset: f32,
}

impl CountingLine {
    pub fn new(position: f32, offset: f32) -> Self {
        Self {
            position,
            offset: offset.abs(),
        }
    }

    pub fn from_config(cfg: &CountingConfig) -> Self {
        Self::new(cfg.line_position, cfg.line_offset)
    }

    pub fn contains(&self, cy: f32) -> bool {
        cy >= self.position - self.offset && cy <= self.position + self.offset
    }

    /// Latch `counted` the first time `cy` falls inside the band.
    /// Returns true only on that first trigger.
    pub fn check(&self, cy: f32, counted: &mut bool) -> bool {
        if *counted || !self.contains(cy) {
            return false;
        }
        *counted = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_is_inclusive() {
        let line = CountingLine::new(500.0, 6.0);
        assert!(line.contains(494.0));
        assert!(line.contains(497.0));
        assert!(line.contains(506.0));
        assert!(!line.contains(493.9));
        assert!(!line.contains(506.1));
    }

    #[test]
    fn test_counts_once() {
        let line = CountingLine::new(500.0, 6.0);
        let mut counted = false;
        assert!(line.check(497.0, &mut counted));
        assert!(counted);
        assert!(!line.check(499.0, &mut counted));
        assert!(!line.check(510.0, &mut counted));
        assert!(!line.check(501.0, &mut counted));
        assert!(counted);
    }

    #[test]
    fn test_outside_band_does_not_latch() {
        let line = CountingLine::new(500.0, 6.0);
        let mut counted = false;
        assert!(!line.check(300.0, &mut counted));
        assert!(!counted);
    }
}
