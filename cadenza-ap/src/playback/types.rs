//! Track references and slot identifiers

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Where a track's audio lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub path: PathBuf,
    /// Must be materialized by the cloud collaborator before opening
    #[serde(default)]
    pub cloud_hosted: bool,
}

impl Locator {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cloud_hosted: false,
        }
    }

    pub fn cloud(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cloud_hosted: true,
        }
    }
}

/// Immutable track reference
///
/// Owned by the catalog; the transport only holds clones. `duration_secs`
/// and `sample_rate` are catalog metadata and are superseded by the opened
/// source once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub title: String,
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub locator: Locator,
}

impl Track {
    /// Track with a fresh id and unknown duration/rate
    pub fn new(title: impl Into<String>, locator: Locator) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            duration_secs: 0.0,
            sample_rate: 0,
            locator,
        }
    }

    /// Track for a local file, titled after the file stem
    pub fn from_path(path: &Path) -> Self {
        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Untitled")
            .to_string();
        Self::new(title, Locator::local(path))
    }

    pub fn with_metadata(mut self, duration_secs: f64, sample_rate: u32) -> Self {
        self.duration_secs = duration_secs;
        self.sample_rate = sample_rate;
        self
    }
}

/// One of the two alternating output paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotId {
    A,
    B,
}

impl SlotId {
    pub fn other(self) -> SlotId {
        match self {
            SlotId::A => SlotId::B,
            SlotId::B => SlotId::A,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            SlotId::A => 0,
            SlotId::B => 1,
        }
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotId::A => write!(f, "A"),
            SlotId::B => write!(f, "B"),
        }
    }
}
