//! User command handlers
//!
//! Commands that move or interrupt playback (pause, seek, next, previous,
//! stop, play_track, load_track) first commit a running crossfade, so they
//! always act on the incoming track. A user transition whose target is still
//! loading is taken as a direct switch instead.

use super::core::TransportController;
use crate::audio::source::SourceState;
use crate::error::{CrossfadeAbort, Error, Result};
use crate::playback::crossfade::CrossfadeOrigin;
use crate::playback::events::{Command, Reply};
use crate::playback::fader::{fade_step, spawn_step_timer};
use crate::playback::generation::GenerationKind;
use crate::playback::types::Track;
use crate::snapshot::TransportSnapshot;
use cadenza_common::events::{LoopMode, TransportState};
use std::ops::ControlFlow;
use tracing::{debug, info, warn};

impl TransportController {
    pub(super) fn handle_command(&mut self, command: Command) -> ControlFlow<Reply<()>> {
        match &command {
            Command::Status(_) => {}
            other => info!("Command: {}", other.name()),
        }

        match command {
            Command::Play(reply) => Self::reply(reply, self.play()),
            Command::Pause(reply) => Self::reply(reply, self.pause()),
            Command::Stop(reply) => Self::reply(reply, self.stop()),
            Command::Seek(time, reply) => Self::reply(reply, self.seek(time)),
            Command::Next { autoplay, reply } => Self::reply(reply, self.skip(true, autoplay)),
            Command::Previous { autoplay, reply } => {
                Self::reply(reply, self.skip(false, autoplay))
            }
            Command::PlayTrack { track, queue, reply } => {
                Self::reply(reply, self.play_track(track, queue))
            }
            Command::LoadTrack {
                track,
                preserve_position,
                reply,
            } => Self::reply(reply, self.load_track(track, preserve_position)),
            Command::ToggleShuffle(reply) => Self::reply(reply, self.toggle_shuffle()),
            Command::CycleLoopMode(reply) => Self::reply(reply, self.cycle_loop_mode()),
            Command::CrossfadeTo {
                index,
                duration_secs,
                reply,
            } => Self::reply(reply, self.crossfade_to(index, duration_secs)),
            Command::Restore(snapshot, reply) => Self::reply(reply, self.restore(*snapshot)),
            Command::Status(reply) => {
                let status = self.build_status();
                Self::reply(reply, Ok(status));
            }
            Command::Shutdown(reply) => {
                self.shutdown();
                return ControlFlow::Break(reply);
            }
        }
        ControlFlow::Continue(())
    }

    pub(super) fn play(&mut self) -> Result<()> {
        match self.state {
            TransportState::Playing => Ok(()),
            TransportState::Loading => {
                self.play_on_load = true;
                Ok(())
            }
            TransportState::Paused if matches!(self.source, SourceState::Ready(_)) => {
                self.resume();
                Ok(())
            }
            TransportState::Paused | TransportState::Stopped => {
                let Some(track) = self
                    .current_track
                    .clone()
                    .or_else(|| self.queue.current().cloned())
                else {
                    return Err(self.invalid_state("play with nothing queued"));
                };
                let start = self.pending_start.take().unwrap_or(0.0);
                self.begin_load(track, start, true);
                Ok(())
            }
        }
    }

    /// Restart the armed active slot, fading in if configured
    fn resume(&mut self) {
        self.interrupted_while_playing = false;
        let fade_generation = self.guard.advance(GenerationKind::Fade);
        match self.resume_fade {
            Some(fade) => {
                self.scheduler.set_master_gain(0.0);
                spawn_step_timer(
                    self.tx.clone(),
                    self.guard.clone(),
                    GenerationKind::Fade,
                    fade_generation,
                    fade.steps,
                    fade.interval,
                    fade_step,
                );
            }
            None => self.scheduler.set_master_gain(1.0),
        }
        let slot = self.scheduler.active();
        self.scheduler.start(slot);
        self.set_state(TransportState::Playing);
    }

    pub(super) fn pause(&mut self) -> Result<()> {
        match self.state {
            TransportState::Playing => {
                self.commit_crossfade();
                if let Some(target) = self.take_pending_user_target() {
                    // Land on the requested track, paused once it loads
                    self.hard_switch(target, false);
                    return Ok(());
                }
                self.refresh_position();
                self.guard.advance(GenerationKind::Fade);
                let slot = self.scheduler.active();
                self.scheduler.halt(slot);
                self.set_state(TransportState::Paused);
                self.save_snapshot();
                Ok(())
            }
            TransportState::Loading => {
                self.play_on_load = false;
                Ok(())
            }
            TransportState::Paused | TransportState::Stopped => Ok(()),
        }
    }

    pub(super) fn stop(&mut self) -> Result<()> {
        self.commit_crossfade();
        if let Some(target) = self.take_pending_user_target() {
            if let Some(track) = self.queue.get(target).cloned() {
                self.queue.set_index(target);
                self.set_current_track(Some(track));
            }
        }
        self.release_playback();
        self.source = SourceState::Unloaded;
        self.play_on_load = false;
        self.pending_start = None;
        self.interrupted_while_playing = false;
        self.position.reset();
        self.position.set_duration(self.current_duration());
        self.set_state(TransportState::Stopped);
        self.save_snapshot();
        Ok(())
    }

    pub(super) fn seek(&mut self, time: f64) -> Result<()> {
        if let Some(target) = self.take_pending_user_target() {
            let autoplay = self.wants_playback();
            self.hard_switch(target, autoplay);
        }
        // A running crossfade is committed first, so validate against the
        // incoming track
        let duration = match &self.crossfade {
            Some(session) => session.incoming_info.duration_secs(),
            None => self.current_duration(),
        };
        if !time.is_finite() || time < 0.0 || time >= duration {
            warn!(
                "Rejecting seek to {:.3}s (duration {:.3}s)",
                time, duration
            );
            return Err(Error::InvalidSeekPosition {
                requested: time,
                duration,
            });
        }

        self.commit_crossfade();

        match &self.source {
            SourceState::Ready(info) => {
                let info = info.clone();
                let generation = self.guard.advance(GenerationKind::Segment);
                let frame = info.frames_for_secs(time);
                let slot = self.scheduler.active();
                self.scheduler.reschedule(slot, frame, generation);
                self.position
                    .rebase(frame as f64 / info.sample_rate as f64, info.sample_rate);
                self.crossfade_declined = false;
            }
            SourceState::Loading { .. } => {
                self.load_start_secs = time;
                self.position.seek_to(time);
            }
            SourceState::Unloaded | SourceState::Failed(_) => {
                self.pending_start = Some(time);
                self.position.seek_to(time);
            }
        }
        info!("Seek to {:.3}s", time);
        Ok(())
    }

    /// next (`forward`) or previous, wrapping around the queue
    ///
    /// Repeated skips count from the last requested track, even while it is
    /// still loading.
    pub(super) fn skip(&mut self, forward: bool, autoplay: Option<bool>) -> Result<()> {
        self.commit_crossfade();
        let from = self
            .take_pending_user_target()
            .unwrap_or_else(|| self.queue.index());

        let target = if forward {
            self.queue.next_after(from)
        } else {
            self.queue.previous_before(from)
        };
        let Some(target) = target else {
            return Err(self.invalid_state("skip with an empty queue"));
        };
        let autoplay = autoplay.unwrap_or_else(|| self.wants_playback());

        if autoplay && self.state == TransportState::Playing && target != self.queue.index() {
            let requested = self.config.crossfade_settings().duration_secs;
            match self.try_crossfade(target, requested, CrossfadeOrigin::User) {
                Ok(()) => return Ok(()),
                Err(reason) => debug!("Switching without crossfade: {}", reason),
            }
        }

        self.hard_switch(target, autoplay);
        Ok(())
    }

    pub(super) fn play_track(&mut self, track: Track, mut queue: Vec<Track>) -> Result<()> {
        self.commit_crossfade();
        let index = match queue.iter().position(|t| t.id == track.id) {
            Some(index) => index,
            None => {
                queue.insert(0, track);
                0
            }
        };
        self.queue.replace(queue, index, &mut self.rng);
        self.emit_queue_changed();

        let Some(current) = self.queue.current().cloned() else {
            return Err(self.invalid_state("play_track with an empty queue"));
        };
        self.pending_start = None;
        self.begin_load(current, 0.0, true);
        Ok(())
    }

    pub(super) fn load_track(&mut self, track: Track, preserve_position: bool) -> Result<()> {
        self.commit_crossfade();
        let start = if preserve_position {
            self.refresh_position();
            self.position.elapsed()
        } else {
            0.0
        };
        let autoplay = self.wants_playback();
        if let Some(index) = self.queue.position_of(track.id) {
            self.queue.set_index(index);
        }
        self.pending_start = None;
        self.begin_load(track, start, autoplay);
        Ok(())
    }

    pub(super) fn toggle_shuffle(&mut self) -> Result<bool> {
        // Queue indices move, so a requested target still loading is taken
        // now and stays selected through the reorder
        self.commit_crossfade();
        if let Some(target) = self.take_pending_user_target() {
            let autoplay = self.wants_playback();
            self.hard_switch(target, autoplay);
        }
        let shuffled = self.queue.toggle_shuffle(&mut self.rng);
        info!("Shuffle {}", if shuffled { "on" } else { "off" });
        self.emit_mode_changed();
        self.emit_queue_changed();
        self.save_snapshot();
        Ok(shuffled)
    }

    pub(super) fn cycle_loop_mode(&mut self) -> Result<LoopMode> {
        let mode = self.queue.cycle_loop_mode();
        info!("Loop mode {}", mode);
        // The automatic target depends on the loop mode
        if self
            .pending_crossfade
            .as_ref()
            .is_some_and(|p| p.origin == CrossfadeOrigin::Auto)
        {
            self.cancel_pending_crossfade();
        }
        self.crossfade_declined = false;
        self.emit_mode_changed();
        self.save_snapshot();
        Ok(mode)
    }

    pub(super) fn crossfade_to(&mut self, index: usize, duration_secs: Option<f64>) -> Result<()> {
        if self.crossfade.is_some() || self.pending_crossfade.is_some() {
            warn!("Crossfade to {} rejected: already crossfading", index);
            return Err(CrossfadeAbort::AlreadyCrossfading.into());
        }
        if self.queue.get(index).is_none() {
            warn!("Crossfade to {} rejected: queue has {} tracks", index, self.queue.len());
            return Err(CrossfadeAbort::InvalidTarget(index).into());
        }

        let requested =
            duration_secs.unwrap_or_else(|| self.config.crossfade_settings().duration_secs);
        if let Err(reason) = self.try_crossfade(index, requested, CrossfadeOrigin::User) {
            info!("Crossfade to {} not possible ({}), switching directly", index, reason);
            self.hard_switch(index, true);
        }
        Ok(())
    }

    pub(super) fn restore(&mut self, snapshot: TransportSnapshot) -> Result<()> {
        self.commit_crossfade();
        self.release_playback();
        self.source = SourceState::Unloaded;
        self.play_on_load = false;

        let tracks: Vec<Track> = snapshot
            .queue
            .iter()
            .filter_map(|id| self.catalog.lookup(*id))
            .collect();
        if tracks.len() < snapshot.queue.len() {
            warn!(
                "Snapshot references {} tracks missing from the catalog",
                snapshot.queue.len() - tracks.len()
            );
        }
        let index = snapshot
            .current_track_id
            .and_then(|id| tracks.iter().position(|t| t.id == id))
            .unwrap_or(0);
        self.queue
            .restore(tracks, index, snapshot.loop_mode, snapshot.shuffled);

        let current = snapshot
            .current_track_id
            .and_then(|id| self.catalog.lookup(id))
            .or_else(|| self.queue.current().cloned());

        let time = if snapshot.playback_time.is_finite() {
            snapshot.playback_time.max(0.0)
        } else {
            0.0
        };
        self.position.reset();
        self.position
            .set_duration(current.as_ref().map(|t| t.duration_secs).unwrap_or(0.0));
        self.position.seek_to(time);
        self.pending_start = (time > 0.0).then_some(time);

        info!(
            "Restored {} queued tracks at index {} ({:.1}s)",
            self.queue.len(),
            self.queue.index(),
            time
        );
        self.set_current_track(current);
        self.emit_queue_changed();
        self.emit_mode_changed();
        self.set_state(TransportState::Stopped);
        Ok(())
    }

    fn shutdown(&mut self) {
        info!("Shutting down transport");
        self.commit_crossfade();
        self.refresh_position();
        self.save_snapshot();
        self.release_playback();
        self.source = SourceState::Unloaded;
        self.set_state(TransportState::Stopped);
        self.session.deactivate();
    }
}
