//! Published transport state
//!
//! The owner task is the only writer. Readers get a consistent copy of the
//! last published `PlayerStatus` and can subscribe to the event stream.

use crate::playback::types::Track;
use cadenza_common::events::{EventBus, TransportEvent, TransportState};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

/// Snapshot of everything a front end displays
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerStatus {
    pub state: TransportState,
    pub current_track: Option<Track>,
    pub is_playing: bool,
    /// Seconds into the current track
    pub playback_time: f64,
    pub duration: f64,
    pub queue: Vec<Track>,
    pub current_index: usize,
    /// Loop mode `Queue`
    pub is_repeating: bool,
    pub is_shuffled: bool,
    /// Loop mode `Song`
    pub is_looping_song: bool,
    pub is_crossfading: bool,
    pub output_volume: f32,
}

impl PlayerStatus {
    pub fn current_track_id(&self) -> Option<uuid::Uuid> {
        self.current_track.as_ref().map(|t| t.id)
    }
}

pub struct SharedState {
    status: RwLock<PlayerStatus>,
    events: EventBus,
}

impl SharedState {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            status: RwLock::new(PlayerStatus::default()),
            events: EventBus::new(event_capacity),
        }
    }

    pub async fn status(&self) -> PlayerStatus {
        self.status.read().await.clone()
    }

    pub(crate) async fn publish(&self, status: PlayerStatus) {
        *self.status.write().await = status;
    }

    pub fn emit(&self, event: TransportEvent) {
        self.events.emit_lossy(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_replaces_status() {
        let shared = SharedState::default();
        assert_eq!(shared.status().await.state, TransportState::Stopped);

        shared
            .publish(PlayerStatus {
                state: TransportState::Paused,
                playback_time: 12.0,
                ..Default::default()
            })
            .await;

        let status = shared.status().await;
        assert_eq!(status.state, TransportState::Paused);
        assert_eq!(status.playback_time, 12.0);
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let shared = SharedState::default();
        let mut rx = shared.subscribe();
        shared.emit(TransportEvent::CrossfadeCompleted {
            track_id: uuid::Uuid::nil(),
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(rx.recv().await.unwrap().event_type(), "CrossfadeCompleted");
    }
}
