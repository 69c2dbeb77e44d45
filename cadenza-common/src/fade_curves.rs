//! Gain curves for the resume fade-in
//!
//! Track-to-track crossfades always ramp linearly. These curves only shape
//! the master gain ramp applied when playback resumes from pause.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

/// Shape of a 0 → 1 gain ramp, named in settings files in snake_case
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    Linear,
    /// Quadratic: quiet for most of the ramp, then rises quickly
    #[default]
    Exponential,
    /// Square root: loud early, settles slowly
    Logarithmic,
    /// Raised cosine
    SCurve,
    /// Quarter sine, constant perceived power
    EqualPower,
}

impl FadeCurve {
    /// Gain at `progress` through the ramp; out-of-range input is clamped
    pub fn gain_at(self, progress: f32) -> f32 {
        let p = progress.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => p,
            FadeCurve::Exponential => p * p,
            FadeCurve::Logarithmic => p.sqrt(),
            FadeCurve::SCurve => (1.0 - (PI * p).cos()) / 2.0,
            FadeCurve::EqualPower => (FRAC_PI_2 * p).sin(),
        }
    }
}
