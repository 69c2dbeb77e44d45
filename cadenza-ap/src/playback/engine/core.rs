//! Transport controller: owner task state and main loop
//!
//! The controller is the single writer of transport state. It runs as one
//! tokio task consuming the engine queue plus a position tick, and
//! republishes `PlayerStatus` after every message.

use super::EngineServices;
use crate::audio::source::SourceState;
use crate::error::{Error, Result};
use crate::playback::crossfade::{CrossfadeSession, PendingCrossfade};
use crate::playback::events::{EngineMessage, Reply};
use crate::playback::fader::ResumeFade;
use crate::playback::generation::{GenerationGuard, GenerationKind};
use crate::playback::loader::TrackLoader;
use crate::playback::position::PositionTracker;
use crate::playback::queue::PlaybackQueue;
use crate::playback::render::RenderGraph;
use crate::playback::scheduler::DualNodeScheduler;
use crate::playback::types::Track;
use crate::services::{Catalog, ConfigStore};
use crate::session::SessionAdapter;
use crate::snapshot::{SnapshotWriter, TransportSnapshot};
use crate::state::{PlayerStatus, SharedState};
use cadenza_common::config::TransportSettings;
use cadenza_common::events::{LoopMode, TransportEvent, TransportState};
use cadenza_common::time;
use rand::rngs::StdRng;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub(crate) struct TransportController {
    pub(super) settings: TransportSettings,
    pub(super) catalog: Arc<dyn Catalog>,
    pub(super) config: Arc<dyn ConfigStore>,
    pub(super) session: Arc<dyn SessionAdapter>,
    pub(super) guard: Arc<GenerationGuard>,
    pub(super) scheduler: DualNodeScheduler,
    pub(super) loader: TrackLoader,
    pub(super) queue: PlaybackQueue,
    pub(super) state: TransportState,
    pub(super) source: SourceState,
    /// Published track; switched optimistically when a crossfade is armed
    pub(super) current_track: Option<Track>,
    pub(super) position: PositionTracker,
    pub(super) crossfade: Option<CrossfadeSession>,
    pub(super) pending_crossfade: Option<PendingCrossfade>,
    /// Start playing when the in-flight primary load completes
    pub(super) play_on_load: bool,
    /// Start offset of the in-flight primary load
    pub(super) load_start_secs: f64,
    /// Offset for the next implicit load (restore, seek while stopped)
    pub(super) pending_start: Option<f64>,
    /// An automatic crossfade was declined for the current track
    pub(super) crossfade_declined: bool,
    pub(super) interrupted_while_playing: bool,
    pub(super) resume_fade: Option<ResumeFade>,
    pub(super) tx: mpsc::UnboundedSender<EngineMessage>,
    pub(super) shared: Arc<SharedState>,
    pub(super) rng: StdRng,
    snapshots: Option<SnapshotWriter>,
}

impl TransportController {
    pub(super) fn new(
        settings: TransportSettings,
        services: EngineServices,
        graph: Arc<RenderGraph>,
        tx: mpsc::UnboundedSender<EngineMessage>,
        shared: Arc<SharedState>,
        guard: Arc<GenerationGuard>,
        rng: StdRng,
    ) -> Self {
        let resume_fade = ResumeFade::new(settings.resume_fade_in_ms, settings.resume_fade_curve);
        let snapshots = settings.snapshot_path.clone().map(SnapshotWriter::spawn);
        Self {
            catalog: services.catalog,
            config: services.config,
            session: services.session,
            guard,
            scheduler: DualNodeScheduler::new(graph),
            loader: TrackLoader::new(services.loader, tx.clone()),
            queue: PlaybackQueue::new(),
            state: TransportState::Stopped,
            source: SourceState::Unloaded,
            current_track: None,
            position: PositionTracker::new(),
            crossfade: None,
            pending_crossfade: None,
            play_on_load: false,
            load_start_secs: 0.0,
            pending_start: None,
            crossfade_declined: false,
            interrupted_while_playing: false,
            resume_fade,
            tx,
            shared,
            rng,
            snapshots,
            settings,
        }
    }

    pub(super) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineMessage>) {
        let period = Duration::from_millis(self.settings.position_tick_ms.max(1));
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut shutdown_reply: Option<Reply<()>> = None;
        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(message) = message else {
                        debug!("Engine queue closed");
                        break;
                    };
                    if let ControlFlow::Break(reply) = self.handle_message(message) {
                        shutdown_reply = Some(reply);
                        break;
                    }
                }
                _ = tick.tick() => self.on_tick(),
            }
            let status = self.build_status();
            self.shared.publish(status).await;
        }

        self.loader.cancel_all();
        if let Some(writer) = self.snapshots.take() {
            writer.close().await;
        }
        let status = self.build_status();
        self.shared.publish(status).await;
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(Ok(()));
        }
        info!("Transport engine stopped");
    }

    fn handle_message(&mut self, message: EngineMessage) -> ControlFlow<Reply<()>> {
        match message {
            EngineMessage::Command(command) => return self.handle_command(command),
            EngineMessage::Render(event) => self.on_render_event(event),
            EngineMessage::Load(outcome) => self.on_load_outcome(outcome),
            EngineMessage::RampStep { generation, step } => self.on_ramp_step(generation, step),
            EngineMessage::FadeStep { generation, step } => self.on_fade_step(generation, step),
            EngineMessage::Session(signal) => self.on_session_signal(signal),
        }
        ControlFlow::Continue(())
    }

    pub(super) fn set_state(&mut self, new_state: TransportState) {
        if self.state == new_state {
            return;
        }
        let old_state = std::mem::replace(&mut self.state, new_state);
        info!("Transport state: {} -> {}", old_state, new_state);

        match new_state {
            TransportState::Playing => {
                if let Err(e) = self.session.activate() {
                    warn!("Session activation failed: {}", e);
                }
            }
            TransportState::Stopped => self.session.deactivate(),
            TransportState::Loading | TransportState::Paused => {}
        }

        self.shared.emit(TransportEvent::StateChanged {
            old_state,
            new_state,
            timestamp: time::now(),
        });
    }

    /// Replace the published track, announcing and persisting real changes
    pub(super) fn set_current_track(&mut self, track: Option<Track>) {
        let old_id = self.current_track.as_ref().map(|t| t.id);
        let new_id = track.as_ref().map(|t| t.id);
        self.current_track = track;
        if old_id == new_id {
            return;
        }
        self.shared.emit(TransportEvent::TrackChanged {
            track_id: new_id,
            title: self.current_track.as_ref().map(|t| t.title.clone()),
            index: self.queue.index(),
            timestamp: time::now(),
        });
        self.save_snapshot();
    }

    pub(super) fn emit_queue_changed(&self) {
        self.shared.emit(TransportEvent::QueueChanged {
            track_ids: self.queue.track_ids(),
            current_index: self.queue.index(),
            timestamp: time::now(),
        });
    }

    pub(super) fn emit_mode_changed(&self) {
        self.shared.emit(TransportEvent::ModeChanged {
            shuffled: self.queue.is_shuffled(),
            loop_mode: self.queue.loop_mode(),
            timestamp: time::now(),
        });
    }

    /// Play intent: playing now, or will play when the load lands
    pub(super) fn wants_playback(&self) -> bool {
        self.state == TransportState::Playing
            || (self.state == TransportState::Loading && self.play_on_load)
    }

    /// Sample the render clock, only while playing and not crossfading
    pub(super) fn refresh_position(&mut self) {
        if self.state == TransportState::Playing
            && self.crossfade.is_none()
            && matches!(self.source, SourceState::Ready(_))
        {
            let rendered = self.scheduler.rendered_frames(self.scheduler.active());
            self.position.update(rendered);
        }
    }

    /// Duration of the current track: opened source first, catalog otherwise
    pub(super) fn current_duration(&self) -> f64 {
        match &self.source {
            SourceState::Ready(info) => info.duration_secs(),
            SourceState::Unloaded | SourceState::Loading { .. } | SourceState::Failed(_) => self
                .current_track
                .as_ref()
                .map(|t| t.duration_secs)
                .unwrap_or(0.0),
        }
    }

    pub(super) fn build_status(&mut self) -> PlayerStatus {
        self.refresh_position();
        let loop_mode = self.queue.loop_mode();
        PlayerStatus {
            state: self.state,
            current_track: self.current_track.clone(),
            is_playing: self.state == TransportState::Playing,
            playback_time: self.position.elapsed(),
            duration: self.current_duration(),
            queue: self.queue.tracks().to_vec(),
            current_index: self.queue.index(),
            is_repeating: loop_mode == LoopMode::Queue,
            is_shuffled: self.queue.is_shuffled(),
            is_looping_song: loop_mode == LoopMode::Song,
            is_crossfading: self.crossfade.is_some(),
            output_volume: self.session.output_volume(),
        }
    }

    pub(super) fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            current_track_id: self.current_track.as_ref().map(|t| t.id),
            playback_time: self.position.elapsed(),
            queue: self.queue.track_ids(),
            loop_mode: self.queue.loop_mode(),
            shuffled: self.queue.is_shuffled(),
            saved_at: time::now(),
        }
    }

    pub(super) fn save_snapshot(&self) {
        if let Some(writer) = &self.snapshots {
            writer.submit(self.snapshot());
        }
    }

    /// Cancel loads and ramps, release both slots
    pub(super) fn release_playback(&mut self) {
        self.loader.cancel_all();
        self.pending_crossfade = None;
        self.crossfade = None;
        self.guard.advance(GenerationKind::Segment);
        self.guard.advance(GenerationKind::Crossfade);
        self.guard.advance(GenerationKind::Fade);
        self.scheduler.retire_all();
        self.scheduler.set_master_gain(1.0);
    }

    pub(super) fn invalid_state(&self, what: &str) -> Error {
        warn!("{} rejected in state {}", what, self.state);
        Error::InvalidState(format!("{} not possible while {}", what, self.state))
    }

    pub(super) fn reply<T>(reply: Reply<T>, result: Result<T>) {
        if reply.send(result).is_err() {
            debug!("Command caller went away before the reply");
        }
    }
}
