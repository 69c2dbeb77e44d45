//! # Cadenza Common Library
//!
//! Shared code for the Cadenza player crates:
//! - Transport event types and the event bus
//! - Transport settings and config file resolution
//! - Fade curve definitions
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod time;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
