//! Messages consumed by the transport owner task
//!
//! Everything that mutates transport state arrives through one queue:
//! user commands, render completions, loader results, ramp/fade timer steps
//! and session signals. Deferred messages carry the generation they were
//! dispatched under and are re-validated on arrival.

use super::loader::LoadOutcome;
use super::types::{SlotId, Track};
use crate::error::Result;
use crate::session::SessionSignal;
use crate::snapshot::TransportSnapshot;
use crate::state::PlayerStatus;
use cadenza_common::events::LoopMode;
use tokio::sync::oneshot;

pub type Reply<T> = oneshot::Sender<Result<T>>;

/// Completion reports from the render thread
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    /// The slot rendered its last frame
    SegmentFinished { generation: u64, slot: SlotId },

    /// The slot's source failed mid-render; the slot stops rendering
    SegmentFailed {
        generation: u64,
        slot: SlotId,
        reason: String,
    },
}

/// User-facing commands, each answered on its reply channel
#[derive(Debug)]
pub enum Command {
    Play(Reply<()>),
    Pause(Reply<()>),
    Stop(Reply<()>),
    Seek(f64, Reply<()>),
    /// `autoplay: None` keeps the current play intent
    Next {
        autoplay: Option<bool>,
        reply: Reply<()>,
    },
    Previous {
        autoplay: Option<bool>,
        reply: Reply<()>,
    },
    PlayTrack {
        track: Track,
        queue: Vec<Track>,
        reply: Reply<()>,
    },
    LoadTrack {
        track: Track,
        preserve_position: bool,
        reply: Reply<()>,
    },
    ToggleShuffle(Reply<bool>),
    CycleLoopMode(Reply<LoopMode>),
    CrossfadeTo {
        index: usize,
        duration_secs: Option<f64>,
        reply: Reply<()>,
    },
    Restore(Box<TransportSnapshot>, Reply<()>),
    Status(Reply<PlayerStatus>),
    Shutdown(Reply<()>),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play(_) => "play",
            Command::Pause(_) => "pause",
            Command::Stop(_) => "stop",
            Command::Seek(..) => "seek",
            Command::Next { .. } => "next",
            Command::Previous { .. } => "previous",
            Command::PlayTrack { .. } => "play_track",
            Command::LoadTrack { .. } => "load_track",
            Command::ToggleShuffle(_) => "toggle_shuffle",
            Command::CycleLoopMode(_) => "cycle_loop_mode",
            Command::CrossfadeTo { .. } => "crossfade_to",
            Command::Restore(..) => "restore",
            Command::Status(_) => "status",
            Command::Shutdown(_) => "shutdown",
        }
    }
}

#[derive(Debug)]
pub enum EngineMessage {
    Command(Command),
    Render(RenderEvent),
    Load(LoadOutcome),
    RampStep { generation: u64, step: u32 },
    FadeStep { generation: u64, step: u32 },
    Session(SessionSignal),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names() {
        let (tx, _rx) = oneshot::channel();
        assert_eq!(Command::Seek(1.0, tx).name(), "seek");
        let (tx, _rx) = oneshot::channel();
        assert_eq!(
            Command::Next {
                autoplay: None,
                reply: tx
            }
            .name(),
            "next"
        );
    }

    #[test]
    fn test_render_event_equality() {
        let a = RenderEvent::SegmentFinished {
            generation: 3,
            slot: SlotId::A,
        };
        assert_eq!(
            a,
            RenderEvent::SegmentFinished {
                generation: 3,
                slot: SlotId::A
            }
        );
        assert_ne!(
            a,
            RenderEvent::SegmentFinished {
                generation: 3,
                slot: SlotId::B
            }
        );
    }
}
