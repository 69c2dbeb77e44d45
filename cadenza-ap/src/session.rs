//! Output session adapter
//!
//! Abstracts the platform audio session: output format negotiation,
//! activation, hardware volume, and interruption/route-change signals.

use crate::error::SessionConfigError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Format the render graph produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChange {
    /// The current output device went away (headphones unplugged)
    DeviceUnavailable,
    DeviceAvailable,
    /// The hardware changed format underneath us
    ConfigurationChanged,
}

/// Signals delivered by the platform session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    InterruptionBegan,
    InterruptionEnded { should_resume: bool },
    RouteChanged(RouteChange),
}

pub trait SessionAdapter: Send + Sync {
    /// Ask the output to adopt a format
    ///
    /// On failure the previous configuration stays in effect.
    fn configure_for_format(
        &self,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(), SessionConfigError>;

    fn activate(&self) -> Result<(), SessionConfigError>;

    fn deactivate(&self);

    /// Hardware output volume (0.0-1.0)
    fn output_volume(&self) -> f32;

    fn output_format(&self) -> OutputFormat;

    fn subscribe(&self) -> broadcast::Receiver<SessionSignal>;
}

struct SoftwareSessionInner {
    format: OutputFormat,
    active: bool,
    volume: f32,
}

/// In-process session used with software sinks
///
/// Accepts any format unless restricted with `with_supported_rates`.
/// Signals are injected with `inject`, which is how the CLI and tests
/// simulate interruptions and route changes.
pub struct SoftwareSession {
    inner: Mutex<SoftwareSessionInner>,
    supported_rates: Option<Vec<u32>>,
    supported_formats: Option<Vec<OutputFormat>>,
    signal_tx: broadcast::Sender<SessionSignal>,
}

impl SoftwareSession {
    pub fn new(format: OutputFormat) -> Self {
        let (signal_tx, _) = broadcast::channel(16);
        Self {
            inner: Mutex::new(SoftwareSessionInner {
                format,
                active: false,
                volume: 1.0,
            }),
            supported_rates: None,
            supported_formats: None,
            signal_tx,
        }
    }

    pub fn with_supported_rates(mut self, rates: Vec<u32>) -> Self {
        self.supported_rates = Some(rates);
        self
    }

    /// Restrict to exact rate/channel pairs, as an output device reports them
    pub fn with_supported_formats(mut self, formats: Vec<OutputFormat>) -> Self {
        self.supported_formats = Some(formats);
        self
    }

    pub fn set_output_volume(&self, volume: f32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.volume = volume.clamp(0.0, 1.0);
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().map(|i| i.active).unwrap_or(false)
    }

    /// Deliver a signal to subscribers
    pub fn inject(&self, signal: SessionSignal) {
        debug!("Session signal: {:?}", signal);
        let _ = self.signal_tx.send(signal);
    }

    fn poisoned(sample_rate: u32, channels: u16) -> SessionConfigError {
        SessionConfigError {
            sample_rate,
            channels,
            reason: "session state poisoned".to_string(),
        }
    }
}

impl Default for SoftwareSession {
    fn default() -> Self {
        Self::new(OutputFormat::default())
    }
}

impl SessionAdapter for SoftwareSession {
    fn configure_for_format(
        &self,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(), SessionConfigError> {
        if sample_rate == 0 || channels == 0 {
            return Err(SessionConfigError {
                sample_rate,
                channels,
                reason: "empty format".to_string(),
            });
        }
        if let Some(rates) = &self.supported_rates {
            if !rates.contains(&sample_rate) {
                return Err(SessionConfigError {
                    sample_rate,
                    channels,
                    reason: "unsupported sample rate".to_string(),
                });
            }
        }
        if let Some(formats) = &self.supported_formats {
            let requested = OutputFormat {
                sample_rate,
                channels,
            };
            if !formats.contains(&requested) {
                return Err(SessionConfigError {
                    sample_rate,
                    channels,
                    reason: "format not supported by the output device".to_string(),
                });
            }
        }
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Self::poisoned(sample_rate, channels))?;
        if inner.format.sample_rate != sample_rate || inner.format.channels != channels {
            info!("Output format {} Hz / {} ch", sample_rate, channels);
        }
        inner.format = OutputFormat {
            sample_rate,
            channels,
        };
        Ok(())
    }

    fn activate(&self) -> Result<(), SessionConfigError> {
        let mut inner = self.inner.lock().map_err(|_| Self::poisoned(0, 0))?;
        inner.active = true;
        Ok(())
    }

    fn deactivate(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.active = false;
        }
    }

    fn output_volume(&self) -> f32 {
        self.inner.lock().map(|i| i.volume).unwrap_or(1.0)
    }

    fn output_format(&self) -> OutputFormat {
        self.inner.lock().map(|i| i.format).unwrap_or_default()
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.signal_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_configure_keeps_previous_format() {
        let session = SoftwareSession::default().with_supported_rates(vec![44_100, 48_000]);
        session.configure_for_format(48_000, 2).unwrap();
        assert!(session.configure_for_format(96_000, 2).is_err());
        assert_eq!(
            session.output_format(),
            OutputFormat {
                sample_rate: 48_000,
                channels: 2
            }
        );
    }

    #[test]
    fn test_supported_formats_match_rate_and_channels() {
        let stereo_48k = OutputFormat {
            sample_rate: 48_000,
            channels: 2,
        };
        let session = SoftwareSession::default()
            .with_supported_formats(vec![OutputFormat::default(), stereo_48k]);
        session.configure_for_format(48_000, 2).unwrap();
        let err = session.configure_for_format(48_000, 1).unwrap_err();
        assert_eq!(err.channels, 1);
        assert_eq!(session.output_format(), stereo_48k);
    }

    #[test]
    fn test_activation_and_volume() {
        let session = SoftwareSession::default();
        assert!(!session.is_active());
        session.activate().unwrap();
        assert!(session.is_active());
        session.set_output_volume(1.7);
        assert_eq!(session.output_volume(), 1.0);
        session.deactivate();
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_injected_signals_reach_subscribers() {
        let session = SoftwareSession::default();
        let mut rx = session.subscribe();
        session.inject(SessionSignal::InterruptionEnded { should_resume: true });
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionSignal::InterruptionEnded { should_resume: true }
        );
    }
}
