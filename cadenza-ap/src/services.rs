//! External collaborators consumed by the transport
//!
//! The catalog, cloud materialization, settings and bookmark resolution
//! live outside this crate; these traits are the seams, and the simple
//! implementations here back the CLI and tests.

use crate::playback::types::{Locator, Track};
use async_trait::async_trait;
use cadenza_common::config::CrossfadeConfig;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Read-only track lookup
pub trait Catalog: Send + Sync {
    fn lookup(&self, track_id: Uuid) -> Option<Track>;
}

/// Materializes cloud-hosted files on local storage
#[async_trait]
pub trait CloudCollaborator: Send + Sync {
    async fn ensure_local(&self, locator: &Locator) -> Result<(), String>;
}

/// Live crossfade settings
pub trait ConfigStore: Send + Sync {
    fn crossfade_settings(&self) -> CrossfadeConfig;
}

/// Finds files that moved since the track was catalogued
pub trait BookmarkResolver: Send + Sync {
    fn resolve(&self, track: &Track) -> Option<Locator>;
}

#[derive(Default)]
pub struct InMemoryCatalog {
    tracks: RwLock<HashMap<Uuid, Track>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, track: Track) {
        if let Ok(mut tracks) = self.tracks.write() {
            tracks.insert(track.id, track);
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<Track> for InMemoryCatalog {
    fn from_iter<I: IntoIterator<Item = Track>>(iter: I) -> Self {
        let catalog = InMemoryCatalog::new();
        for track in iter {
            catalog.insert(track);
        }
        catalog
    }
}

impl Catalog for InMemoryCatalog {
    fn lookup(&self, track_id: Uuid) -> Option<Track> {
        self.tracks.read().ok()?.get(&track_id).cloned()
    }
}

/// Cloud collaborator for installs without cloud storage
///
/// Every materialization request fails, so cloud-hosted tracks surface as
/// `DownloadFailed`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalOnlyCloud;

#[async_trait]
impl CloudCollaborator for LocalOnlyCloud {
    async fn ensure_local(&self, locator: &Locator) -> Result<(), String> {
        Err(format!(
            "no cloud provider configured for {}",
            locator.path.display()
        ))
    }
}

/// Resolver that never relocates anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBookmarks;

impl BookmarkResolver for NoBookmarks {
    fn resolve(&self, _track: &Track) -> Option<Locator> {
        None
    }
}

/// Bookmark table keyed by track id
#[derive(Default)]
pub struct BookmarkTable {
    entries: RwLock<HashMap<Uuid, Locator>>,
}

impl BookmarkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relocate(&self, track_id: Uuid, locator: Locator) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(track_id, locator);
        }
    }
}

impl BookmarkResolver for BookmarkTable {
    fn resolve(&self, track: &Track) -> Option<Locator> {
        self.entries.read().ok()?.get(&track.id).cloned()
    }
}

/// Runtime-updatable settings store
#[derive(Default)]
pub struct SettingsStore {
    crossfade: RwLock<CrossfadeConfig>,
}

impl SettingsStore {
    pub fn new(crossfade: CrossfadeConfig) -> Self {
        Self {
            crossfade: RwLock::new(crossfade),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut CrossfadeConfig)) {
        if let Ok(mut crossfade) = self.crossfade.write() {
            f(&mut crossfade);
        }
    }
}

impl ConfigStore for SettingsStore {
    fn crossfade_settings(&self) -> CrossfadeConfig {
        self.crossfade
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}
