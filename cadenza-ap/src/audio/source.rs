//! Opened audio sources
//!
//! A `FrameSource` is a decodable handle with a frame cursor; `AudioSource`
//! binds one to the track it was opened for. Sources are owned by exactly
//! one render slot and dropped when that slot is retired.

use crate::error::{Error, Result};
use std::sync::Arc;
use uuid::Uuid;

/// Interleaved f32 frame source
pub trait FrameSource: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Total length in frames
    fn frame_length(&self) -> u64;

    /// Move the decode cursor (clamped to `frame_length`)
    fn seek(&mut self, frame: u64);

    /// Fill `out` with interleaved samples from the cursor
    ///
    /// Returns the number of whole frames written; 0 means end of source.
    fn read(&mut self, out: &mut [f32]) -> Result<usize>;
}

/// Fully decoded PCM held in memory
///
/// The sample buffer is shared, so cloning a `PcmSource` only duplicates
/// the cursor.
#[derive(Debug, Clone)]
pub struct PcmSource {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
    cursor: u64,
}

impl PcmSource {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(Error::Decode(format!(
                "invalid PCM format: {} Hz, {} channels",
                sample_rate, channels
            )));
        }
        Ok(Self {
            samples: samples.into(),
            sample_rate,
            channels,
            cursor: 0,
        })
    }

    /// Constant-level source lasting `secs` seconds
    pub fn constant(level: f32, secs: f64, sample_rate: u32, channels: u16) -> Result<Self> {
        let frames = (secs * sample_rate as f64).round() as usize;
        let samples = vec![level; frames * channels as usize];
        Self::new(samples, sample_rate, channels)
    }
}

impl FrameSource for PcmSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn frame_length(&self) -> u64 {
        (self.samples.len() / self.channels as usize) as u64
    }

    fn seek(&mut self, frame: u64) {
        self.cursor = frame.min(self.frame_length());
    }

    fn read(&mut self, out: &mut [f32]) -> Result<usize> {
        let ch = self.channels as usize;
        let remaining = (self.frame_length() - self.cursor) as usize;
        let frames = (out.len() / ch).min(remaining);
        let start = self.cursor as usize * ch;
        let end = start + frames * ch;
        out[..frames * ch].copy_from_slice(&self.samples[start..end]);
        self.cursor += frames as u64;
        Ok(frames)
    }
}

/// Format summary of an opened source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub track_id: Uuid,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_length: u64,
}

impl SourceInfo {
    /// `frame_length / sample_rate`
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frame_length as f64 / self.sample_rate as f64
        }
    }

    pub fn frames_for_secs(&self, secs: f64) -> u64 {
        let frames = (secs.max(0.0) * self.sample_rate as f64).round() as u64;
        frames.min(self.frame_length)
    }
}

/// An opened source bound to one track
pub struct AudioSource {
    track_id: Uuid,
    inner: Box<dyn FrameSource>,
}

impl AudioSource {
    pub fn new(track_id: Uuid, inner: Box<dyn FrameSource>) -> Self {
        Self { track_id, inner }
    }

    pub fn track_id(&self) -> Uuid {
        self.track_id
    }

    pub fn info(&self) -> SourceInfo {
        SourceInfo {
            track_id: self.track_id,
            sample_rate: self.inner.sample_rate(),
            channels: self.inner.channels(),
            frame_length: self.inner.frame_length(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    pub fn channels(&self) -> u16 {
        self.inner.channels()
    }

    pub fn frame_length(&self) -> u64 {
        self.inner.frame_length()
    }

    pub fn seek(&mut self, frame: u64) {
        self.inner.seek(frame)
    }

    pub fn read(&mut self, out: &mut [f32]) -> Result<usize> {
        self.inner.read(out)
    }
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSource")
            .field("track_id", &self.track_id)
            .field("sample_rate", &self.inner.sample_rate())
            .field("channels", &self.inner.channels())
            .field("frame_length", &self.inner.frame_length())
            .finish()
    }
}

/// Controller-side view of the primary source
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SourceState {
    #[default]
    Unloaded,
    /// A primary load is in flight under `generation`
    Loading { track_id: Uuid, generation: u64 },
    Ready(SourceInfo),
    Failed(String),
}
