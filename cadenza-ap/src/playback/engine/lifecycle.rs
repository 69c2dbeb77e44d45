//! Track lifecycle: loading, natural end, render reports and session signals

use super::core::TransportController;
use crate::audio::source::SourceState;
use crate::error::{CrossfadeAbort, LoadError};
use crate::playback::events::RenderEvent;
use crate::playback::generation::GenerationKind;
use crate::playback::loader::{LoadLane, LoadOutcome};
use crate::playback::types::Track;
use crate::session::{OutputFormat, RouteChange, SessionSignal};
use cadenza_common::events::{TransportEvent, TransportState};
use cadenza_common::time;
use tracing::{debug, error, info, warn};

impl TransportController {
    /// Replace whatever is playing with `track`, opened from `start_secs`
    ///
    /// Every earlier segment, ramp and load becomes stale.
    pub(super) fn begin_load(&mut self, track: Track, start_secs: f64, autoplay: bool) {
        self.crossfade = None;
        self.pending_crossfade = None;
        self.loader.cancel_all();
        self.guard.advance(GenerationKind::Crossfade);
        self.guard.advance(GenerationKind::Fade);
        let generation = self.guard.advance(GenerationKind::Segment);
        self.scheduler.retire_all();
        self.scheduler.set_master_gain(1.0);

        self.crossfade_declined = false;
        self.play_on_load = autoplay;
        self.load_start_secs = start_secs.max(0.0);
        self.position.reset();
        self.position.set_duration(track.duration_secs);
        self.position.rebase(self.load_start_secs, track.sample_rate);

        info!(
            "Loading '{}' from {:.3}s (generation {}, autoplay {})",
            track.title, self.load_start_secs, generation, autoplay
        );
        self.source = SourceState::Loading {
            track_id: track.id,
            generation,
        };
        self.loader
            .request(LoadLane::Primary, generation, track.clone());
        self.set_current_track(Some(track));
        self.set_state(TransportState::Loading);
    }

    /// Switch to the queue entry at `index` without a crossfade
    pub(super) fn hard_switch(&mut self, index: usize, autoplay: bool) {
        let Some(track) = self.queue.get(index).cloned() else {
            warn!("No queue entry at index {}", index);
            return;
        };
        self.queue.set_index(index);
        self.pending_start = None;
        self.begin_load(track, 0.0, autoplay);
    }

    pub(super) fn on_load_outcome(&mut self, outcome: LoadOutcome) {
        match outcome.lane {
            LoadLane::Primary => self.on_primary_loaded(outcome),
            LoadLane::Crossfade => self.on_crossfade_loaded(outcome),
        }
    }

    fn on_primary_loaded(&mut self, outcome: LoadOutcome) {
        let expected = matches!(
            &self.source,
            SourceState::Loading { generation, .. } if *generation == outcome.generation
        ) && self
            .guard
            .is_current(GenerationKind::Segment, outcome.generation);
        if !expected {
            debug!(
                "Discarding stale load of '{}' (generation {})",
                outcome.track.title, outcome.generation
            );
            return;
        }
        self.loader.finished(LoadLane::Primary);

        let loaded = match outcome.result {
            Ok(loaded) => loaded,
            Err(e) => {
                self.on_primary_failed(&outcome.track, e);
                return;
            }
        };
        if loaded.resolved != outcome.track.locator {
            info!(
                "'{}' opened from relocated path {:?}",
                outcome.track.title, loaded.resolved.path
            );
        }

        self.apply_output_format(loaded.source.sample_rate(), loaded.source.channels());

        let duration = loaded.source.info().duration_secs();
        let start = if duration > 0.0 {
            self.load_start_secs.min(duration)
        } else {
            0.0
        };
        let frame = loaded.source.info().frames_for_secs(start);
        let slot = self.scheduler.active();
        let info = self
            .scheduler
            .schedule(slot, frame, loaded.source, outcome.generation);
        self.scheduler.set_volume(slot, 1.0);

        self.position.set_duration(info.duration_secs());
        self.position
            .rebase(frame as f64 / info.sample_rate as f64, info.sample_rate);
        self.source = SourceState::Ready(info);
        self.load_start_secs = 0.0;

        if std::mem::take(&mut self.play_on_load) {
            self.scheduler.start(slot);
            self.set_state(TransportState::Playing);
        } else {
            self.set_state(TransportState::Paused);
        }
        self.save_snapshot();
    }

    fn on_primary_failed(&mut self, track: &Track, e: LoadError) {
        error!("Failed to load '{}': {}", track.title, e);
        self.emit_unavailable(track, &e);
        self.source = SourceState::Failed(e.to_string());
        self.play_on_load = false;
        self.set_state(TransportState::Stopped);
    }

    /// Ask the session for the source's format
    ///
    /// On refusal the previous output format stays in effect and playback
    /// continues with it.
    pub(super) fn apply_output_format(&mut self, sample_rate: u32, channels: u16) -> bool {
        let requested = OutputFormat {
            sample_rate,
            channels,
        };
        if self.scheduler.graph().format() == requested
            && self.session.output_format() == requested
        {
            return true;
        }

        let applied = match self.session.configure_for_format(sample_rate, channels) {
            Ok(()) => {
                info!("Output reconfigured to {} Hz, {} channels", sample_rate, channels);
                self.scheduler.set_output_format(requested);
                true
            }
            Err(e) => {
                warn!("Keeping previous output format: {}", e);
                self.scheduler.set_output_format(self.session.output_format());
                false
            }
        };
        self.shared.emit(TransportEvent::OutputReconfigured {
            sample_rate,
            channels,
            applied,
            timestamp: time::now(),
        });
        applied
    }

    pub(super) fn on_render_event(&mut self, event: RenderEvent) {
        match event {
            RenderEvent::SegmentFinished { generation, slot } => {
                if !self.guard.is_current(GenerationKind::Segment, generation) {
                    debug!("Ignoring stale completion on slot {} (generation {})", slot, generation);
                    return;
                }
                if slot != self.scheduler.active() || self.crossfade.is_some() {
                    return;
                }
                match self.state {
                    TransportState::Playing | TransportState::Paused => {
                        self.refresh_position();
                        self.handle_natural_end();
                    }
                    TransportState::Stopped | TransportState::Loading => {}
                }
            }
            RenderEvent::SegmentFailed {
                generation,
                slot,
                reason,
            } => {
                if !self.guard.is_current(GenerationKind::Segment, generation) {
                    return;
                }
                if self.crossfade.as_ref().is_some_and(|s| s.incoming == slot) {
                    self.abort_active_crossfade(CrossfadeAbort::SegmentFailed(reason));
                    return;
                }
                if slot != self.scheduler.active() {
                    return;
                }
                error!("Playback failed on slot {}: {}", slot, reason);
                if let Some(track) = self.current_track.clone() {
                    self.emit_unavailable(&track, &LoadError::InvalidAudioFile(reason.clone()));
                }
                if let Some(target) = self.take_pending_user_target() {
                    self.hard_switch(target, true);
                    return;
                }
                self.release_playback();
                self.source = SourceState::Failed(reason);
                self.play_on_load = false;
                self.set_state(TransportState::Stopped);
            }
        }
    }

    /// The active track rendered its last frame
    ///
    /// A user-requested track still loading for a crossfade wins over the
    /// queue order.
    pub(super) fn handle_natural_end(&mut self) {
        let autoplay = self.wants_playback();
        if let Some(target) = self.take_pending_user_target() {
            info!("Track ended before the crossfade was ready, switching to index {}", target);
            self.hard_switch(target, autoplay);
            return;
        }
        let current = self.queue.index();

        match self.queue.natural_next_index() {
            Some(next) if next == current => {
                if let SourceState::Ready(info) = &self.source {
                    let sample_rate = info.sample_rate;
                    info!("Repeating current track");
                    let generation = self.guard.advance(GenerationKind::Segment);
                    let slot = self.scheduler.active();
                    self.scheduler.reschedule(slot, 0, generation);
                    self.position.rebase(0.0, sample_rate);
                    self.crossfade_declined = false;
                } else {
                    self.hard_switch(next, autoplay);
                }
            }
            Some(next) => {
                debug!("Advancing to queue index {}", next);
                self.hard_switch(next, autoplay);
            }
            None => {
                info!("Reached end of queue");
                self.release_playback();
                self.source = SourceState::Unloaded;
                self.play_on_load = false;
                self.pending_start = None;
                self.position.reset();
                self.position.set_duration(self.current_duration());
                self.set_state(TransportState::Stopped);
                self.save_snapshot();
            }
        }
    }

    pub(super) fn on_tick(&mut self) {
        if self.state != TransportState::Playing
            || self.crossfade.is_some()
            || !matches!(self.source, SourceState::Ready(_))
        {
            return;
        }
        self.refresh_position();
        if let Some(track) = &self.current_track {
            self.shared.emit(TransportEvent::PlaybackProgress {
                track_id: track.id,
                position_secs: self.position.elapsed(),
                duration_secs: self.position.duration(),
                timestamp: time::now(),
            });
        }
        self.maybe_auto_crossfade();
    }

    pub(super) fn on_fade_step(&mut self, generation: u64, step: u32) {
        if !self.guard.is_current(GenerationKind::Fade, generation) {
            return;
        }
        if let Some(fade) = self.resume_fade {
            self.scheduler.set_master_gain(fade.gain_at(step));
        }
    }

    pub(super) fn on_session_signal(&mut self, signal: SessionSignal) {
        debug!("Session signal: {:?}", signal);
        match signal {
            SessionSignal::InterruptionBegan => {
                if self.state == TransportState::Playing {
                    info!("Interrupted, pausing");
                    if let Err(e) = self.pause() {
                        warn!("Pause on interruption failed: {}", e);
                    }
                    self.interrupted_while_playing = true;
                }
            }
            SessionSignal::InterruptionEnded { should_resume } => {
                let was_playing = std::mem::take(&mut self.interrupted_while_playing);
                if should_resume && was_playing && self.state == TransportState::Paused {
                    info!("Interruption ended, resuming");
                    if let Err(e) = self.play() {
                        warn!("Resume after interruption failed: {}", e);
                    }
                }
            }
            SessionSignal::RouteChanged(RouteChange::DeviceUnavailable) => {
                if self.state == TransportState::Playing {
                    info!("Output device went away, pausing");
                    if let Err(e) = self.pause() {
                        warn!("Pause on route change failed: {}", e);
                    }
                }
            }
            SessionSignal::RouteChanged(RouteChange::DeviceAvailable) => {}
            SessionSignal::RouteChanged(RouteChange::ConfigurationChanged) => {
                if let SourceState::Ready(info) = &self.source {
                    let (sample_rate, channels) = (info.sample_rate, info.channels);
                    self.apply_output_format(sample_rate, channels);
                }
            }
        }
    }
}
