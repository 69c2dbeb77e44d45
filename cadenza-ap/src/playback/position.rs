//! Position tracking against the render clock
//!
//! `elapsed = seek_offset + rendered_frames / sample_rate`. The controller
//! only samples while playing and not crossfading, so the last value holds
//! through pauses and ramps.

#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    seek_offset: f64,
    sample_rate: u32,
    elapsed: f64,
    duration: f64,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting from `offset` seconds at `sample_rate`
    pub fn rebase(&mut self, offset: f64, sample_rate: u32) {
        self.seek_offset = offset.max(0.0);
        self.sample_rate = sample_rate;
        self.elapsed = self.seek_offset;
    }

    /// Move to `offset` keeping the current sample rate
    pub fn seek_to(&mut self, offset: f64) {
        self.seek_offset = offset.max(0.0);
        self.elapsed = self.seek_offset;
    }

    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration.max(0.0);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Sample the render clock
    pub fn update(&mut self, rendered_frames: u64) -> f64 {
        if self.sample_rate > 0 {
            let mut elapsed = self.seek_offset + rendered_frames as f64 / self.sample_rate as f64;
            if self.duration > 0.0 {
                elapsed = elapsed.min(self.duration);
            }
            self.elapsed = elapsed;
        }
        self.elapsed
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn remaining(&self) -> f64 {
        (self.duration - self.elapsed).max(0.0)
    }

    /// True once `duration - elapsed <= threshold` (never for unknown duration)
    pub fn is_nearing_end(&self, threshold: f64) -> bool {
        self.duration > 0.0 && self.duration - self.elapsed <= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_from_render_clock() {
        let mut p = PositionTracker::new();
        p.set_duration(10.0);
        p.rebase(2.0, 44_100);
        assert_eq!(p.elapsed(), 2.0);
        assert_eq!(p.update(44_100), 3.0);
        assert_eq!(p.remaining(), 7.0);
    }

    #[test]
    fn test_elapsed_capped_at_duration() {
        let mut p = PositionTracker::new();
        p.set_duration(1.0);
        p.rebase(0.0, 1000);
        assert_eq!(p.update(5000), 1.0);
    }

    #[test]
    fn test_nearing_end() {
        let mut p = PositionTracker::new();
        p.set_duration(10.0);
        p.rebase(0.0, 100);
        p.update(799);
        assert!(!p.is_nearing_end(2.0));
        p.update(800);
        assert!(p.is_nearing_end(2.0));
    }

    #[test]
    fn test_unknown_duration_never_nears_end() {
        let mut p = PositionTracker::new();
        p.rebase(0.0, 100);
        p.update(10_000);
        assert!(!p.is_nearing_end(5.0));
    }
}
