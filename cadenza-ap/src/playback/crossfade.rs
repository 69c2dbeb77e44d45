//! Crossfade planning
//!
//! Duration clamping, ramp step count, sample-rate compatibility and the
//! transient session that exists only while both slots are rendering.

use super::types::{SlotId, Track};
use crate::audio::source::SourceInfo;
use cadenza_common::config::MIN_CROSSFADE_SECS;
use std::time::Duration;

/// Spacing targeted between ramp steps
pub const RAMP_STEP_SECS: f64 = 0.030;
pub const MIN_RAMP_STEPS: u32 = 6;
pub const MAX_RAMP_STEPS: u32 = 60;
/// Largest sample-rate difference mixed without resampling
pub const SAMPLE_RATE_TOLERANCE_HZ: u32 = 1;

/// `min(requested, max, max(MIN, remaining))`, or None when below the minimum
pub fn effective_duration(requested: f64, configured_max: f64, remaining: f64) -> Option<f64> {
    let effective = requested
        .min(configured_max)
        .min(remaining.max(MIN_CROSSFADE_SECS));
    (effective.is_finite() && effective >= MIN_CROSSFADE_SECS).then_some(effective)
}

/// Whole 30 ms steps that fit in the ramp, clamped to 6..=60
pub fn step_count(duration_secs: f64) -> u32 {
    // The epsilon keeps exact multiples like 0.9 / 0.03 from truncating down
    let steps = (duration_secs / RAMP_STEP_SECS + 1e-9).floor();
    (steps as u32).clamp(MIN_RAMP_STEPS, MAX_RAMP_STEPS)
}

pub fn rates_compatible(active: u32, incoming: u32) -> bool {
    active.abs_diff(incoming) <= SAMPLE_RATE_TOLERANCE_HZ
}

/// Who asked for the crossfade; decides the fallback on abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossfadeOrigin {
    /// Nearing end of the current track
    Auto,
    /// next/previous/crossfade_to
    User,
}

/// Crossfade whose target is still loading
#[derive(Debug, Clone)]
pub struct PendingCrossfade {
    pub generation: u64,
    pub target_index: usize,
    pub target: Track,
    pub duration_secs: f64,
    pub origin: CrossfadeOrigin,
}

/// A crossfade in progress
#[derive(Debug, Clone)]
pub struct CrossfadeSession {
    pub generation: u64,
    pub duration_secs: f64,
    pub steps: u32,
    pub step: u32,
    pub target_index: usize,
    pub target: Track,
    pub incoming: SlotId,
    pub incoming_info: SourceInfo,
    pub origin: CrossfadeOrigin,
    /// Track and index before the optimistic switch, for restoration
    pub previous_track: Option<Track>,
    pub previous_index: usize,
}

impl CrossfadeSession {
    pub fn step_interval(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs / self.steps as f64)
    }

    /// (incoming, outgoing) volumes after `step`
    pub fn volumes_at(&self, step: u32) -> (f32, f32) {
        let t = (step.min(self.steps) as f32) / self.steps as f32;
        (t, 1.0 - t)
    }

    pub fn is_last_step(&self, step: u32) -> bool {
        step >= self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::types::Locator;

    #[test]
    fn test_effective_duration_clamps() {
        assert_eq!(effective_duration(6.0, 12.0, 30.0), Some(6.0));
        assert_eq!(effective_duration(20.0, 12.0, 30.0), Some(12.0));
        assert_eq!(effective_duration(6.0, 12.0, 1.5), Some(1.5));
        // Remaining time below the minimum is lifted to the minimum
        assert_eq!(effective_duration(6.0, 12.0, 0.0), Some(MIN_CROSSFADE_SECS));
        assert_eq!(effective_duration(0.01, 12.0, 30.0), None);
        assert_eq!(effective_duration(6.0, 0.02, 30.0), None);
    }

    #[test]
    fn test_step_count_truncates_partial_steps() {
        assert_eq!(step_count(0.195), MIN_RAMP_STEPS);
        assert_eq!(step_count(0.239), 7);
        assert_eq!(step_count(1.799), 59);
    }

    #[test]
    fn test_step_count_bounds() {
        assert_eq!(step_count(0.05), MIN_RAMP_STEPS);
        assert_eq!(step_count(0.9), 30);
        assert_eq!(step_count(0.21), 7);
        assert_eq!(step_count(2.0), MAX_RAMP_STEPS);
        assert_eq!(step_count(12.0), MAX_RAMP_STEPS);
    }

    #[test]
    fn test_rate_tolerance() {
        assert!(rates_compatible(44_100, 44_100));
        assert!(rates_compatible(44_100, 44_101));
        assert!(!rates_compatible(44_100, 48_000));
    }

    #[test]
    fn test_linear_ramp_volumes() {
        let session = CrossfadeSession {
            generation: 1,
            duration_secs: 1.0,
            steps: 10,
            step: 0,
            target_index: 1,
            target: Track::new("B", Locator::local("/b.wav")),
            incoming: SlotId::B,
            incoming_info: SourceInfo {
                track_id: uuid::Uuid::nil(),
                sample_rate: 44_100,
                channels: 2,
                frame_length: 44_100,
            },
            origin: CrossfadeOrigin::Auto,
            previous_track: None,
            previous_index: 0,
        };
        assert_eq!(session.volumes_at(0), (0.0, 1.0));
        assert_eq!(session.volumes_at(5), (0.5, 0.5));
        assert_eq!(session.volumes_at(10), (1.0, 0.0));
        assert_eq!(session.volumes_at(99), (1.0, 0.0));
        assert!((session.step_interval().as_secs_f64() - 0.1).abs() < 1e-6);
        assert!(session.is_last_step(10));
    }
}
