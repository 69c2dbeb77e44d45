//! Transport settings and config file resolution

use crate::{Error, FadeCurve, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CADENZA_CONFIG";

/// Shortest crossfade worth rendering (seconds)
pub const MIN_CROSSFADE_SECS: f64 = 0.05;

/// Crossfade settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossfadeConfig {
    pub enabled: bool,
    /// Requested crossfade length, also the "nearing end" threshold
    pub duration_secs: f64,
    /// Upper bound applied to any requested crossfade
    pub max_duration_secs: f64,
}

impl Default for CrossfadeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_secs: 6.0,
            max_duration_secs: 12.0,
        }
    }
}

/// Settings for the transport core
///
/// Every field has a default, so a partial TOML file is valid:
///
/// ```toml
/// resume_fade_in_ms = 250
///
/// [crossfade]
/// duration_secs = 4.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub crossfade: CrossfadeConfig,
    /// Fade-in applied when resuming from pause (0 disables)
    pub resume_fade_in_ms: u64,
    pub resume_fade_curve: FadeCurve,
    /// Interval of the position tick
    pub position_tick_ms: u64,
    /// Where to persist the UI snapshot (None disables persistence)
    pub snapshot_path: Option<PathBuf>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            crossfade: CrossfadeConfig::default(),
            resume_fade_in_ms: 500,
            resume_fade_curve: FadeCurve::default(),
            position_tick_ms: 50,
            snapshot_path: None,
        }
    }
}

impl TransportSettings {
    /// Parse settings from TOML text and validate them
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: TransportSettings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Resolve and load settings
    ///
    /// Missing files fall back to defaults; a file that exists but fails
    /// to parse is an error.
    pub fn resolve(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg) {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) => {
                tracing::debug!("Config file {:?} not found, using defaults", path);
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let cf = &self.crossfade;
        if !cf.duration_secs.is_finite() || cf.duration_secs < 0.0 {
            return Err(Error::Config(format!(
                "crossfade.duration_secs must be a non-negative number, got {}",
                cf.duration_secs
            )));
        }
        if !cf.max_duration_secs.is_finite() || cf.max_duration_secs < MIN_CROSSFADE_SECS {
            return Err(Error::Config(format!(
                "crossfade.max_duration_secs must be at least {}, got {}",
                MIN_CROSSFADE_SECS, cf.max_duration_secs
            )));
        }
        if self.position_tick_ms == 0 {
            return Err(Error::Config("position_tick_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Config file resolution, highest priority first:
/// 1. Command-line argument
/// 2. `CADENZA_CONFIG` environment variable
/// 3. `<config dir>/cadenza/config.toml`
///
/// Returns None when no candidate exists (compiled defaults apply).
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_file().filter(|p| p.exists())
}

/// Platform config file location (`~/.config/cadenza/config.toml` on Linux)
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cadenza").join("config.toml"))
}
