//! Timer-driven volume steps
//!
//! Ramps are not computed on the render thread. A timer task posts discrete
//! step messages to the owner queue, each tagged with the generation it was
//! started under; the task exits as soon as that generation is superseded.

use super::events::EngineMessage;
use super::generation::{GenerationGuard, GenerationKind};
use cadenza_common::FadeCurve;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Granularity of the resume fade-in
pub const FADE_STEP_MS: u64 = 10;

/// Gain schedule for the fade-in applied when resuming from pause
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResumeFade {
    pub curve: FadeCurve,
    pub steps: u32,
    pub interval: Duration,
}

impl ResumeFade {
    /// None when fading is disabled (`duration_ms == 0`)
    pub fn new(duration_ms: u64, curve: FadeCurve) -> Option<Self> {
        if duration_ms == 0 {
            return None;
        }
        let steps = (duration_ms / FADE_STEP_MS).clamp(1, 100) as u32;
        Some(Self {
            curve,
            steps,
            interval: Duration::from_millis(duration_ms) / steps,
        })
    }

    pub fn gain_at(&self, step: u32) -> f32 {
        self.curve.gain_at(step.min(self.steps) as f32 / self.steps as f32)
    }
}

/// Post `steps` step messages, one per `interval`, while `generation` of
/// `kind` stays current
pub fn spawn_step_timer(
    tx: mpsc::UnboundedSender<EngineMessage>,
    guard: Arc<GenerationGuard>,
    kind: GenerationKind,
    generation: u64,
    steps: u32,
    interval: Duration,
    make: fn(u64, u32) -> EngineMessage,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        for step in 1..=steps {
            ticker.tick().await;
            if !guard.is_current(kind, generation) {
                return;
            }
            if tx.send(make(generation, step)).is_err() {
                return;
            }
        }
    })
}

pub fn ramp_step(generation: u64, step: u32) -> EngineMessage {
    EngineMessage::RampStep { generation, step }
}

pub fn fade_step(generation: u64, step: u32) -> EngineMessage {
    EngineMessage::FadeStep { generation, step }
}
