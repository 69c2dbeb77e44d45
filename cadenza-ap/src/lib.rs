//! # Cadenza Audio Player Library (cadenza-ap)
//!
//! Transport core for gapless playback with crossfading between tracks.
//!
//! **Purpose:** Own the transport state (play/pause/seek/skip, queue, loop
//! and shuffle), schedule decoded sources onto two output slots, and ramp
//! between them when a track nears its end or the user skips.
//!
//! **Architecture:** A single owner task consumes commands, load results,
//! render completions and timer steps from one queue. The shared
//! `RenderGraph` is pulled either by an audio device callback or by a
//! render thread feeding an `AudioSink`.

pub mod audio;
pub mod error;
pub mod playback;
pub mod services;
pub mod session;
pub mod snapshot;
pub mod state;

pub use error::{Error, Result};
pub use playback::{Engine, EngineBuilder, TransportHandle};
pub use state::{PlayerStatus, SharedState};
