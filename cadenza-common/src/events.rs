//! Event types for the Cadenza event system
//!
//! Provides the transport state enums shared by every crate, the typed
//! `TransportEvent` stream, and the `EventBus` that distributes it.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Transport state
///
/// Single authoritative value owned by the transport controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    #[default]
    Stopped,
    Loading,
    Playing,
    Paused,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportState::Stopped => write!(f, "stopped"),
            TransportState::Loading => write!(f, "loading"),
            TransportState::Playing => write!(f, "playing"),
            TransportState::Paused => write!(f, "paused"),
        }
    }
}

/// Loop mode, cycled `Off → Queue → Song → Off`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// Stop at the end of the queue
    #[default]
    Off,
    /// Wrap to the first track after the last one
    Queue,
    /// Replay the current track when it ends
    Song,
}

impl LoopMode {
    /// Next mode in the cycle
    pub fn cycled(self) -> Self {
        match self {
            LoopMode::Off => LoopMode::Queue,
            LoopMode::Queue => LoopMode::Song,
            LoopMode::Song => LoopMode::Off,
        }
    }
}

impl std::fmt::Display for LoopMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopMode::Off => write!(f, "off"),
            LoopMode::Queue => write!(f, "queue"),
            LoopMode::Song => write!(f, "song"),
        }
    }
}

/// Transport events published to subscribers
///
/// Serializable so that front ends can forward them unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransportEvent {
    /// Transport state changed
    StateChanged {
        old_state: TransportState,
        new_state: TransportState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The current track reference changed (None when the queue was cleared)
    TrackChanged {
        track_id: Option<Uuid>,
        title: Option<String>,
        index: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic position report while playing
    PlaybackProgress {
        track_id: Uuid,
        position_secs: f64,
        duration_secs: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Both output paths are now rendering
    CrossfadeStarted {
        from_track_id: Uuid,
        to_track_id: Uuid,
        duration_secs: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The incoming track took over the active output path
    CrossfadeCompleted {
        track_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A crossfade attempt was abandoned; playback degrades to a hard cut
    CrossfadeAborted {
        target_track_id: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track could not be loaded
    TrackUnavailable {
        track_id: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue contents or order changed
    QueueChanged {
        track_ids: Vec<Uuid>,
        current_index: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Shuffle flag or loop mode changed
    ModeChanged {
        shuffled: bool,
        loop_mode: LoopMode,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Output session was asked to adopt a new format
    OutputReconfigured {
        sample_rate: u32,
        channels: u16,
        applied: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl TransportEvent {
    /// Event type name, as used in the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            TransportEvent::StateChanged { .. } => "StateChanged",
            TransportEvent::TrackChanged { .. } => "TrackChanged",
            TransportEvent::PlaybackProgress { .. } => "PlaybackProgress",
            TransportEvent::CrossfadeStarted { .. } => "CrossfadeStarted",
            TransportEvent::CrossfadeCompleted { .. } => "CrossfadeCompleted",
            TransportEvent::CrossfadeAborted { .. } => "CrossfadeAborted",
            TransportEvent::TrackUnavailable { .. } => "TrackUnavailable",
            TransportEvent::QueueChanged { .. } => "QueueChanged",
            TransportEvent::ModeChanged { .. } => "ModeChanged",
            TransportEvent::OutputReconfigured { .. } => "OutputReconfigured",
        }
    }
}

/// Central distribution bus for transport events
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block the transport owner)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use cadenza_common::events::{EventBus, TransportEvent, TransportState};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(TransportEvent::StateChanged {
///     old_state: TransportState::Paused,
///     new_state: TransportState::Playing,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TransportEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: TransportEvent,
    ) -> Result<usize, broadcast::error::SendError<TransportEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: TransportEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
