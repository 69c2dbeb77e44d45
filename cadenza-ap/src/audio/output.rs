//! Output sinks and the render thread
//!
//! The render thread pulls fixed quanta from the render graph and hands
//! them to an `AudioSink`, pacing itself against the wall clock so the
//! render clock advances in real time.

use crate::error::{Error, Result};
use crate::playback::render::RenderGraph;
use crate::session::OutputFormat;
use std::io::BufWriter;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Frames rendered per render-thread iteration
pub const RENDER_QUANTUM_FRAMES: usize = 512;

pub trait AudioSink: Send {
    /// Consume one interleaved quantum
    fn write(&mut self, samples: &[f32], format: OutputFormat) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards audio, counting frames
#[derive(Debug, Default)]
pub struct NullSink {
    frames: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl AudioSink for NullSink {
    fn write(&mut self, samples: &[f32], format: OutputFormat) -> Result<()> {
        self.frames += (samples.len() / format.channels.max(1) as usize) as u64;
        Ok(())
    }
}

/// Captures the mix to a 32-bit float WAV file
///
/// The file format is fixed when the sink is created; quanta rendered in
/// another format are dropped with a warning.
pub struct WavCaptureSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    format: OutputFormat,
    mismatch_logged: bool,
}

impl WavCaptureSink {
    pub fn create(path: &Path, format: OutputFormat) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| Error::AudioOutput(format!("{}: {}", path.display(), e)))?;
        info!("Capturing output to {}", path.display());
        Ok(Self {
            writer: Some(writer),
            format,
            mismatch_logged: false,
        })
    }
}

impl AudioSink for WavCaptureSink {
    fn write(&mut self, samples: &[f32], format: OutputFormat) -> Result<()> {
        if format != self.format {
            if !self.mismatch_logged {
                warn!(
                    "Capture is {} Hz / {} ch, output is now {} Hz / {} ch; dropping audio",
                    self.format.sample_rate, self.format.channels, format.sample_rate, format.channels
                );
                self.mismatch_logged = true;
            }
            return Ok(());
        }
        self.mismatch_logged = false;
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        for sample in samples {
            writer
                .write_sample(*sample)
                .map_err(|e| Error::AudioOutput(e.to_string()))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| Error::AudioOutput(e.to_string()))?;
        }
        Ok(())
    }
}

/// Handle to a running render thread; stops it on drop
pub struct RenderThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RenderThread {
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Render thread panicked");
            }
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Spawn the render thread over `graph`
pub fn spawn_render_thread(
    graph: Arc<RenderGraph>,
    mut sink: Box<dyn AudioSink>,
    quantum_frames: usize,
) -> Result<RenderThread> {
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);

    let handle = std::thread::Builder::new()
        .name("cadenza-render".to_string())
        .spawn(move || {
            info!("Render thread started ({} frames per quantum)", quantum_frames);
            let mut renderer = graph.renderer();
            let mut buffer = Vec::new();
            let mut deadline = Instant::now();

            while !thread_stop.load(Ordering::Acquire) {
                let format = graph.format();
                buffer.resize(quantum_frames * format.channels.max(1) as usize, 0.0);
                renderer.render(&mut buffer);
                if let Err(e) = sink.write(&buffer, format) {
                    error!("Audio sink failed: {}", e);
                    break;
                }

                deadline += Duration::from_secs_f64(
                    quantum_frames as f64 / format.sample_rate.max(1) as f64,
                );
                let now = Instant::now();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                } else if now - deadline > Duration::from_secs(1) {
                    warn!("Render thread fell behind by {:?}", now - deadline);
                    deadline = now;
                }
            }

            if let Err(e) = sink.finish() {
                error!("Failed to finish audio sink: {}", e);
            }
            info!("Render thread stopped");
        })?;

    Ok(RenderThread {
        stop,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink_counts_frames() {
        let mut sink = NullSink::new();
        sink.write(&[0.0; 1024], OutputFormat::default()).unwrap();
        assert_eq!(sink.frames_written(), 512);
    }

    #[test]
    fn test_wav_capture_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.wav");
        let format = OutputFormat {
            sample_rate: 8_000,
            channels: 1,
        };

        let mut sink = WavCaptureSink::create(&path, format).unwrap();
        sink.write(&[0.25; 800], format).unwrap();
        sink.write(
            &[0.5; 100],
            OutputFormat {
                sample_rate: 16_000,
                channels: 1,
            },
        )
        .unwrap();
        sink.finish().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8_000);
        assert_eq!(reader.len(), 800);
    }

    #[test]
    fn test_render_thread_stops() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let graph = RenderGraph::new(OutputFormat::default(), tx);
        let thread = spawn_render_thread(graph, Box::new(NullSink::new()), 64).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        thread.stop();
    }
}
