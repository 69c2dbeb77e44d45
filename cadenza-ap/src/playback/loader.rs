//! Track loader
//!
//! Resolves a track to an opened `AudioSource` off the owner task:
//! cloud-hosted files are materialized first, a missing file is retried at
//! its bookmarked location, then the opener decodes it. Each lane has at
//! most one request in flight; a new request aborts the previous one, and
//! results carry the generation they were issued under so the owner can
//! drop anything superseded.

use super::events::EngineMessage;
use super::types::{Locator, Track};
use crate::audio::decoder::SourceOpener;
use crate::audio::source::AudioSource;
use crate::error::LoadError;
use crate::services::{BookmarkResolver, CloudCollaborator};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadLane {
    /// Hard loads of the track to play
    Primary,
    /// Preparing the incoming side of a crossfade
    Crossfade,
}

impl LoadLane {
    fn index(self) -> usize {
        match self {
            LoadLane::Primary => 0,
            LoadLane::Crossfade => 1,
        }
    }
}

/// A successfully opened track
#[derive(Debug)]
pub struct LoadedTrack {
    pub source: AudioSource,
    /// Where the audio was actually found
    pub resolved: Locator,
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub lane: LoadLane,
    pub generation: u64,
    pub track: Track,
    pub result: Result<LoadedTrack, LoadError>,
}

/// Collaborators needed to resolve and open a track
#[derive(Clone)]
pub struct LoaderServices {
    pub opener: Arc<dyn SourceOpener>,
    pub bookmarks: Arc<dyn BookmarkResolver>,
    pub cloud: Arc<dyn CloudCollaborator>,
}

pub struct TrackLoader {
    services: LoaderServices,
    tx: mpsc::UnboundedSender<EngineMessage>,
    in_flight: [Option<AbortHandle>; 2],
}

impl TrackLoader {
    pub fn new(services: LoaderServices, tx: mpsc::UnboundedSender<EngineMessage>) -> Self {
        Self {
            services,
            tx,
            in_flight: [None, None],
        }
    }

    /// Start loading `track` on `lane`, superseding that lane's previous request
    pub fn request(&mut self, lane: LoadLane, generation: u64, track: Track) {
        self.cancel(lane);
        debug!(
            "Load request {:?} gen {} for '{}'",
            lane, generation, track.title
        );

        let services = self.services.clone();
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let result = resolve_and_open(&services, &track).await;
            let _ = tx.send(EngineMessage::Load(LoadOutcome {
                lane,
                generation,
                track,
                result,
            }));
        });
        self.in_flight[lane.index()] = Some(handle.abort_handle());
    }

    pub fn cancel(&mut self, lane: LoadLane) {
        if let Some(handle) = self.in_flight[lane.index()].take() {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel(LoadLane::Primary);
        self.cancel(LoadLane::Crossfade);
    }

    /// Forget the lane's handle once its outcome has been received
    pub fn finished(&mut self, lane: LoadLane) {
        self.in_flight[lane.index()] = None;
    }

    pub fn is_busy(&self, lane: LoadLane) -> bool {
        self.in_flight[lane.index()]
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

/// Resolve a track to an opened source
pub async fn resolve_and_open(
    services: &LoaderServices,
    track: &Track,
) -> Result<LoadedTrack, LoadError> {
    let locator = track.locator.clone();
    if locator.cloud_hosted {
        services
            .cloud
            .ensure_local(&locator)
            .await
            .map_err(LoadError::DownloadFailed)?;
    }

    match services.opener.open(&locator.path).await {
        Ok(inner) => Ok(LoadedTrack {
            source: AudioSource::new(track.id, inner),
            resolved: locator,
        }),
        Err(LoadError::FileNotFound(path)) => {
            let Some(relocated) = services.bookmarks.resolve(track) else {
                return Err(LoadError::FileNotFound(path));
            };
            info!(
                "'{}' moved: {} -> {}",
                track.title,
                path.display(),
                relocated.path.display()
            );
            if relocated.cloud_hosted {
                services
                    .cloud
                    .ensure_local(&relocated)
                    .await
                    .map_err(LoadError::DownloadFailed)?;
            }
            let inner = services.opener.open(&relocated.path).await?;
            Ok(LoadedTrack {
                source: AudioSource::new(track.id, inner),
                resolved: relocated,
            })
        }
        Err(e) => Err(e),
    }
}
