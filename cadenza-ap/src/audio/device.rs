//! Hardware output through cpal
//!
//! The device callback pulls the mix straight from the render graph, so the
//! render clock advances at the hardware rate. `cpal::Stream` is not `Send`:
//! the stream is built and owned by a dedicated host thread, which also
//! rebuilds it when the graph format changes or the stream reports an error.

use crate::error::{Error, Result};
use crate::playback::render::{RenderGraph, Renderer};
use crate::session::{OutputFormat, RouteChange, SessionSignal, SoftwareSession};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SizedSample, Stream, StreamConfig, StreamError};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Rates offered to the session when the device accepts a range
const CANDIDATE_RATES: [u32; 8] = [
    44_100, 48_000, 88_200, 96_000, 176_400, 192_000, 22_050, 32_000,
];

/// How often the host thread checks the stream
const HOST_POLL: Duration = Duration::from_millis(100);

/// Delay between reopen attempts after a failure
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Failed reopens of a named device before falling back to the default
const FALLBACK_AFTER: u32 = 3;

/// One supported configuration range, detached from the cpal device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigRange {
    pub channels: u16,
    pub min_rate: u32,
    pub max_rate: u32,
    pub sample_format: SampleFormat,
}

impl ConfigRange {
    fn accepts(&self, format: OutputFormat) -> bool {
        self.channels == format.channels
            && self.min_rate <= format.sample_rate
            && format.sample_rate <= self.max_rate
    }
}

/// Sample format to open `format` with: f32 first, then i16, then u16
pub fn pick_sample_format(ranges: &[ConfigRange], format: OutputFormat) -> Option<SampleFormat> {
    [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16]
        .into_iter()
        .find(|wanted| {
            ranges
                .iter()
                .any(|r| r.sample_format == *wanted && r.accepts(format))
        })
}

/// Formats from `CANDIDATE_RATES` the device can open, `preferred` first
pub fn supported_formats(ranges: &[ConfigRange], preferred: OutputFormat) -> Vec<OutputFormat> {
    let mut formats = vec![preferred];
    for range in ranges {
        if !matches!(
            range.sample_format,
            SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
        ) {
            continue;
        }
        for rate in CANDIDATE_RATES {
            let format = OutputFormat {
                sample_rate: rate,
                channels: range.channels,
            };
            if range.accepts(format) && !formats.contains(&format) {
                formats.push(format);
            }
        }
    }
    formats
}

pub fn sample_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

pub fn sample_to_u16(sample: f32) -> u16 {
    ((sample.clamp(-1.0, 1.0) + 1.0) * 32767.5) as u16
}

/// Names of the host's output devices
pub fn list_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
        .filter_map(|device| device.name().ok())
        .collect();
    debug!("Found {} output devices", devices.len());
    Ok(devices)
}

/// Find `name`, falling back to the host default
fn open_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    if let Some(name) = name {
        let found = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .find(|d| d.name().ok().as_deref() == Some(name));
        match found {
            Some(device) => {
                info!("Using audio device: {}", name);
                return Ok(device);
            }
            None => warn!("Audio device '{}' not found, using the default device", name),
        }
    }
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;
    info!(
        "Using default audio device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );
    Ok(device)
}

fn config_ranges(device: &Device) -> Result<Vec<ConfigRange>> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
        .map(|range| ConfigRange {
            channels: range.channels(),
            min_rate: range.min_sample_rate().0,
            max_rate: range.max_sample_rate().0,
            sample_format: range.sample_format(),
        })
        .collect();
    Ok(ranges)
}

fn default_format(device: &Device) -> Result<OutputFormat> {
    let config = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
    Ok(OutputFormat {
        sample_rate: config.sample_rate().0,
        channels: config.channels(),
    })
}

/// Session limited to the formats the device can open
///
/// Starts in the device's default format. Sources in other formats are
/// refused, and playback continues in the previous format.
pub fn device_session(device_name: Option<&str>) -> Result<SoftwareSession> {
    let device = open_device(device_name)?;
    let preferred = default_format(&device)?;
    let formats = supported_formats(&config_ranges(&device)?, preferred);
    info!(
        "Device default {} Hz / {} ch, {} formats available",
        preferred.sample_rate,
        preferred.channels,
        formats.len()
    );
    Ok(SoftwareSession::new(preferred).with_supported_formats(formats))
}

/// Device output settings
#[derive(Default)]
pub struct DeviceOptions {
    /// Device name; None selects the host default
    pub device_name: Option<String>,
    /// Frames per callback; None keeps the device default
    pub buffer_frames: Option<u32>,
    /// Receives route changes when the device goes away and comes back
    pub session: Option<Arc<SoftwareSession>>,
}

#[derive(Default)]
struct StreamErrors {
    failed: AtomicBool,
    device_lost: AtomicBool,
    count: AtomicU32,
}

struct OpenStream {
    // Held for its lifetime; dropping it stops the callbacks
    _stream: Stream,
    format: OutputFormat,
    errors: Arc<StreamErrors>,
}

fn build_stream<T, F>(
    device: &Device,
    config: &StreamConfig,
    format: OutputFormat,
    mut renderer: Renderer,
    convert: F,
    errors: Arc<StreamErrors>,
) -> Result<Stream>
where
    T: SizedSample + Send + 'static,
    F: Fn(f32) -> T + Send + 'static,
{
    let mut scratch: Vec<f32> = Vec::new();
    let silence = convert(0.0);
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                // The host thread rebuilds the stream on a format change
                if renderer.graph().format() != format {
                    data.fill(silence);
                    return;
                }
                scratch.resize(data.len(), 0.0);
                renderer.render(&mut scratch);
                for (out, sample) in data.iter_mut().zip(&scratch) {
                    *out = convert(*sample);
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
                if matches!(err, StreamError::DeviceNotAvailable) {
                    errors.device_lost.store(true, Ordering::SeqCst);
                }
                errors.failed.store(true, Ordering::SeqCst);
                errors.count.fetch_add(1, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

fn open_stream(
    device: &Device,
    graph: &Arc<RenderGraph>,
    format: OutputFormat,
    buffer_frames: Option<u32>,
) -> Result<OpenStream> {
    let sample_format = pick_sample_format(&config_ranges(device)?, format).ok_or_else(|| {
        Error::AudioOutput(format!(
            "Device cannot play {} Hz / {} ch",
            format.sample_rate, format.channels
        ))
    })?;
    let config = StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: buffer_frames
            .map(cpal::BufferSize::Fixed)
            .unwrap_or(cpal::BufferSize::Default),
    };

    let errors = Arc::new(StreamErrors::default());
    let renderer = graph.renderer();
    let stream = match sample_format {
        SampleFormat::F32 => {
            build_stream(device, &config, format, renderer, |s| s, Arc::clone(&errors))?
        }
        SampleFormat::I16 => {
            build_stream(device, &config, format, renderer, sample_to_i16, Arc::clone(&errors))?
        }
        SampleFormat::U16 => {
            build_stream(device, &config, format, renderer, sample_to_u16, Arc::clone(&errors))?
        }
        other => {
            return Err(Error::AudioOutput(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    };
    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;

    info!(
        "Audio stream open: {} Hz / {} ch, {:?}, buffer {:?}",
        format.sample_rate, format.channels, sample_format, config.buffer_size
    );
    Ok(OpenStream {
        _stream: stream,
        format,
        errors,
    })
}

/// Owns the device and its stream on the host thread
struct DeviceHost {
    graph: Arc<RenderGraph>,
    options: DeviceOptions,
    device: Device,
    current: Option<OpenStream>,
    failures: u32,
    lost: bool,
    next_attempt: Instant,
}

impl DeviceHost {
    fn open(graph: Arc<RenderGraph>, options: DeviceOptions) -> Result<Self> {
        let device = open_device(options.device_name.as_deref())?;
        let current = open_stream(&device, &graph, graph.format(), options.buffer_frames)?;
        Ok(Self {
            graph,
            options,
            device,
            current: Some(current),
            failures: 0,
            lost: false,
            next_attempt: Instant::now(),
        })
    }

    fn device_name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "Unknown".to_string())
    }

    fn signal(&self, change: RouteChange) {
        if let Some(session) = &self.options.session {
            session.inject(SessionSignal::RouteChanged(change));
        }
    }

    /// One pass of the host loop
    fn service(&mut self) {
        let wanted = self.graph.format();
        let reopen = match &self.current {
            Some(open) => {
                if open.errors.device_lost.load(Ordering::SeqCst) && !self.lost {
                    warn!("Audio device went away");
                    self.lost = true;
                    self.signal(RouteChange::DeviceUnavailable);
                }
                if open.errors.failed.load(Ordering::SeqCst) {
                    warn!(
                        "Rebuilding audio stream after {} errors",
                        open.errors.count.load(Ordering::SeqCst)
                    );
                    true
                } else if open.format != wanted {
                    debug!(
                        "Output format moved to {} Hz / {} ch",
                        wanted.sample_rate, wanted.channels
                    );
                    true
                } else {
                    false
                }
            }
            None => true,
        };
        if !reopen || Instant::now() < self.next_attempt {
            return;
        }

        self.current = None;
        if self.failures > FALLBACK_AFTER && self.options.device_name.is_some() {
            warn!("Repeated failures, switching to the default device");
            self.options.device_name = None;
            match open_device(None) {
                Ok(device) => self.device = device,
                Err(e) => {
                    self.retry_later(e);
                    return;
                }
            }
        }
        match open_stream(&self.device, &self.graph, wanted, self.options.buffer_frames) {
            Ok(open) => {
                self.current = Some(open);
                self.failures = 0;
                if self.lost {
                    info!("Audio device is back");
                    self.lost = false;
                    self.signal(RouteChange::DeviceAvailable);
                }
            }
            Err(e) => self.retry_later(e),
        }
    }

    fn retry_later(&mut self, e: Error) {
        self.failures += 1;
        warn!("Audio stream reopen failed ({}): {}", self.failures, e);
        self.next_attempt = Instant::now() + RETRY_INTERVAL;
    }
}

/// Handle to the device host thread; stops it on drop
pub struct DeviceOutput {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    device_name: String,
}

impl DeviceOutput {
    /// Open the device and start pulling from `graph`
    ///
    /// Blocks until the first stream is playing or has failed to open.
    pub fn start(graph: Arc<RenderGraph>, options: DeviceOptions) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let handle = std::thread::Builder::new()
            .name("cadenza-device".to_string())
            .spawn(move || {
                let mut host = match DeviceHost::open(graph, options) {
                    Ok(host) => {
                        let _ = ready_tx.send(Ok(host.device_name()));
                        host
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                info!("Device output started");
                while !thread_stop.load(Ordering::Acquire) {
                    std::thread::sleep(HOST_POLL);
                    host.service();
                }
                host.current = None;
                info!("Device output stopped");
            })?;

        let device_name = match ready_rx.recv() {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(Error::AudioOutput(
                    "device thread exited during startup".to_string(),
                ));
            }
        };

        Ok(Self {
            stop,
            handle: Some(handle),
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Device thread panicked");
            }
        }
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.halt();
    }
}
