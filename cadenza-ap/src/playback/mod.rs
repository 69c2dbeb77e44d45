//! Playback engine, dual-slot scheduling and queue management

pub mod crossfade;
pub mod engine;
pub mod events;
pub mod fader;
pub mod generation;
pub mod loader;
pub mod position;
pub mod queue;
pub mod render;
pub mod scheduler;
pub mod types;

pub use engine::{Engine, EngineBuilder, TransportHandle};
pub use render::{RenderGraph, Renderer};
pub use types::{Locator, SlotId, Track};
