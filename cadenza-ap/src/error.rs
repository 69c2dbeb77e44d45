//! Error types for cadenza-ap
//!
//! Load failures, session configuration failures and crossfade aborts are
//! recoverable: the transport translates them into state transitions and
//! events. Only command-level rejections surface to callers.

use std::path::PathBuf;
use thiserror::Error;

/// Typed failure of a track load attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// The file does not exist (and no bookmark resolved it elsewhere)
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The file exists but could not be opened as audio
    #[error("Invalid audio file: {0}")]
    InvalidAudioFile(String),

    /// A cloud-hosted file could not be materialized locally
    #[error("Download failed: {0}")]
    DownloadFailed(String),
}

/// Why a crossfade attempt was abandoned
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrossfadeAbort {
    #[error("crossfade disabled")]
    Disabled,

    #[error("already crossfading")]
    AlreadyCrossfading,

    #[error("a track load is in flight")]
    LoadInFlight,

    #[error("effective duration {0:.3}s is below the minimum")]
    TooShort(f64),

    #[error("sample rate mismatch: {active} Hz vs {incoming} Hz")]
    SampleRateMismatch { active: u32, incoming: u32 },

    #[error("target index {0} is out of range")]
    InvalidTarget(usize),

    #[error("nothing is playing")]
    NotPlaying,

    #[error("target failed to load: {0}")]
    Load(LoadError),

    #[error("incoming segment failed: {0}")]
    SegmentFailed(String),
}

/// Output session could not adopt the requested format
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Session configuration failed for {sample_rate} Hz / {channels} ch: {reason}")]
pub struct SessionConfigError {
    pub sample_rate: u32,
    pub channels: u16,
    pub reason: String,
}

/// Main error type for cadenza-ap
#[derive(Error, Debug)]
pub enum Error {
    #[error("Load failed: {0}")]
    Load(#[from] LoadError),

    #[error(transparent)]
    SessionConfig(#[from] SessionConfigError),

    #[error("Crossfade aborted: {0}")]
    CrossfadeAborted(CrossfadeAbort),

    /// Seek target outside `[0, duration)`
    #[error("Invalid seek position {requested:.3}s (duration {duration:.3}s)")]
    InvalidSeekPosition { requested: f64, duration: f64 },

    /// Command not applicable in the current transport state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Audio decode errors while rendering
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output sink errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// The transport owner task is gone
    #[error("Transport engine has shut down")]
    EngineShutdown,

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] cadenza_common::Error),
}

impl From<CrossfadeAbort> for Error {
    fn from(reason: CrossfadeAbort) -> Self {
        Error::CrossfadeAborted(reason)
    }
}

/// Convenience Result type using cadenza-ap Error
pub type Result<T> = std::result::Result<T, Error>;
