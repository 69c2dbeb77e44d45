//! Source openers
//!
//! `SourceOpener` is the seam the track loader opens files through. The
//! bundled `SymphoniaOpener` decodes the whole file into memory on the
//! blocking pool.

use super::source::{FrameSource, PcmSource};
use crate::error::LoadError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Opens a local path as a decodable frame source
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, LoadError>;
}

/// Decode-whole-file opener backed by symphonia
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaOpener;

#[async_trait]
impl SourceOpener for SymphoniaOpener {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, LoadError> {
        let path = path.to_path_buf();
        let source = tokio::task::spawn_blocking(move || Self::decode_file(&path))
            .await
            .map_err(|e| LoadError::InvalidAudioFile(format!("decode task failed: {}", e)))??;
        Ok(Box::new(source))
    }
}

impl SymphoniaOpener {
    /// Decode an entire file to interleaved f32 PCM
    pub fn decode_file(path: &PathBuf) -> Result<PcmSource, LoadError> {
        debug!("Decoding entire file: {}", path.display());

        let file = std::fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::FileNotFound(path.clone()),
            _ => LoadError::InvalidAudioFile(format!("{}: {}", path.display(), e)),
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let detected = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| LoadError::InvalidAudioFile(format!("unrecognized format: {}", e)))?;
        let mut format = detected.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| LoadError::InvalidAudioFile("no audio track".to_string()))?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate;
        let mut channels = track.codec_params.channels.map(|c| c.count() as u16);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::InvalidAudioFile(format!("unsupported codec: {}", e)))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    warn!("Error reading packet from {}: {}", path.display(), e);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate.get_or_insert(spec.rate);
                    channels.get_or_insert(spec.channels.count() as u16);

                    let buf = sample_buf.get_or_insert_with(|| {
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
                    });
                    if (buf.capacity() as u64) < decoded.capacity() as u64 * spec.channels.count() as u64 {
                        *buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    }
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping undecodable packet in {}: {}", path.display(), e);
                }
                Err(e) => {
                    return Err(LoadError::InvalidAudioFile(format!("decode failed: {}", e)));
                }
            }
        }

        let (sample_rate, channels) = match (sample_rate, channels) {
            (Some(rate), Some(ch)) if rate > 0 && ch > 0 => (rate, ch),
            _ => {
                return Err(LoadError::InvalidAudioFile(
                    "sample rate or channel count unknown".to_string(),
                ))
            }
        };

        debug!(
            "Decoded {} frames at {} Hz, {} channels",
            samples.len() / channels as usize,
            sample_rate,
            channels
        );

        PcmSource::new(samples, sample_rate, channels)
            .map_err(|e| LoadError::InvalidAudioFile(e.to_string()))
    }
}
