//! Crossfade orchestration
//!
//! Preparation loads the target on the crossfade lane while the active
//! slot keeps playing. Once the source is open and rate-compatible the
//! published track switches to the target, the inactive slot is armed
//! under a fresh segment generation (which makes the outgoing slot's
//! completion stale) and a timer drives the linear ramp. Completion swaps
//! slot roles and releases the outgoing source.

use super::core::TransportController;
use crate::audio::source::SourceState;
use crate::error::{CrossfadeAbort, LoadError};
use crate::playback::crossfade::{
    effective_duration, rates_compatible, step_count, CrossfadeOrigin, CrossfadeSession,
    PendingCrossfade,
};
use crate::playback::fader::{ramp_step, spawn_step_timer};
use crate::playback::generation::GenerationKind;
use crate::playback::loader::{LoadLane, LoadOutcome, LoadedTrack};
use crate::playback::types::Track;
use cadenza_common::events::{TransportEvent, TransportState};
use cadenza_common::time;
use tracing::{debug, info, warn};

impl TransportController {
    /// Check preconditions and start loading the crossfade target
    pub(super) fn try_crossfade(
        &mut self,
        target_index: usize,
        requested_secs: f64,
        origin: CrossfadeOrigin,
    ) -> Result<(), CrossfadeAbort> {
        if self.crossfade.is_some() || self.pending_crossfade.is_some() {
            return Err(CrossfadeAbort::AlreadyCrossfading);
        }
        let settings = self.config.crossfade_settings();
        if !settings.enabled {
            return Err(CrossfadeAbort::Disabled);
        }
        if matches!(self.source, SourceState::Loading { .. }) || self.loader.is_busy(LoadLane::Primary) {
            return Err(CrossfadeAbort::LoadInFlight);
        }
        if self.state != TransportState::Playing || !matches!(self.source, SourceState::Ready(_)) {
            return Err(CrossfadeAbort::NotPlaying);
        }
        let Some(target) = self.queue.get(target_index).cloned() else {
            return Err(CrossfadeAbort::InvalidTarget(target_index));
        };

        self.refresh_position();
        let duration_secs = effective_duration(
            requested_secs,
            settings.max_duration_secs,
            self.position.remaining(),
        )
        .ok_or(CrossfadeAbort::TooShort(
            requested_secs.min(settings.max_duration_secs),
        ))?;

        let generation = self.guard.advance(GenerationKind::Crossfade);
        info!(
            "Preparing crossfade to '{}' over {:.2}s ({:?})",
            target.title, duration_secs, origin
        );
        self.loader
            .request(LoadLane::Crossfade, generation, target.clone());
        self.pending_crossfade = Some(PendingCrossfade {
            generation,
            target_index,
            target,
            duration_secs,
            origin,
        });
        Ok(())
    }

    /// Start the automatic crossfade once the track nears its end
    pub(super) fn maybe_auto_crossfade(&mut self) {
        if self.crossfade_declined || self.crossfade.is_some() || self.pending_crossfade.is_some() {
            return;
        }
        let settings = self.config.crossfade_settings();
        if !settings.enabled || !self.position.is_nearing_end(settings.duration_secs) {
            return;
        }
        // Repeating the same track or reaching the end is left to natural end
        let Some(target) = self.queue.natural_next_index() else {
            return;
        };
        if target == self.queue.index() {
            return;
        }

        if let Err(reason) = self.try_crossfade(target, settings.duration_secs, CrossfadeOrigin::Auto) {
            debug!("Automatic crossfade declined: {}", reason);
            self.crossfade_declined = true;
        }
    }

    /// Drop a crossfade whose target is still loading
    pub(super) fn cancel_pending_crossfade(&mut self) {
        if let Some(pending) = self.pending_crossfade.take() {
            debug!("Cancelling crossfade preparation for '{}'", pending.target.title);
            self.guard.advance(GenerationKind::Crossfade);
            self.loader.cancel(LoadLane::Crossfade);
        }
    }

    /// Drop a crossfade still in preparation, returning its target if the
    /// user asked for it
    ///
    /// A user transition was already acknowledged, so callers switch to the
    /// returned index without a crossfade. Automatic targets are recomputed
    /// later and are simply dropped.
    pub(super) fn take_pending_user_target(&mut self) -> Option<usize> {
        let pending = self.pending_crossfade.as_ref()?;
        let user_target =
            (pending.origin == CrossfadeOrigin::User).then_some(pending.target_index);
        self.cancel_pending_crossfade();
        if let Some(index) = user_target {
            debug!("Taking requested track {} without crossfade", index);
        }
        user_target
    }

    pub(super) fn on_crossfade_loaded(&mut self, outcome: LoadOutcome) {
        let expected = self
            .pending_crossfade
            .as_ref()
            .is_some_and(|p| p.generation == outcome.generation)
            && self
                .guard
                .is_current(GenerationKind::Crossfade, outcome.generation);
        if !expected {
            debug!(
                "Discarding stale crossfade load of '{}' (generation {})",
                outcome.track.title, outcome.generation
            );
            return;
        }
        self.loader.finished(LoadLane::Crossfade);
        let Some(pending) = self.pending_crossfade.take() else {
            return;
        };

        let loaded = match outcome.result {
            Ok(loaded) => loaded,
            Err(e) => {
                self.emit_unavailable(&pending.target, &e);
                self.crossfade_failed(
                    pending.origin,
                    pending.target_index,
                    &pending.target,
                    CrossfadeAbort::Load(e),
                );
                return;
            }
        };

        let SourceState::Ready(active) = &self.source else {
            debug!("Source changed while preparing crossfade");
            return;
        };
        let incoming_rate = loaded.source.sample_rate();
        if !rates_compatible(active.sample_rate, incoming_rate) {
            let reason = CrossfadeAbort::SampleRateMismatch {
                active: active.sample_rate,
                incoming: incoming_rate,
            };
            self.crossfade_failed(pending.origin, pending.target_index, &pending.target, reason);
            return;
        }

        self.arm_crossfade(pending, loaded);
    }

    fn arm_crossfade(&mut self, pending: PendingCrossfade, loaded: LoadedTrack) {
        self.refresh_position();
        let settings = self.config.crossfade_settings();
        let Some(duration_secs) = effective_duration(
            pending.duration_secs,
            settings.max_duration_secs,
            self.position.remaining(),
        ) else {
            let reason = CrossfadeAbort::TooShort(pending.duration_secs);
            self.crossfade_failed(pending.origin, pending.target_index, &pending.target, reason);
            return;
        };

        let incoming = self.scheduler.inactive();
        let previous_track = self.current_track.clone();
        let previous_index = self.queue.index();

        // Optimistic switch; restored if the incoming side fails mid-ramp
        self.queue.set_index(pending.target_index);
        self.set_current_track(Some(pending.target.clone()));

        let segment_generation = self.guard.advance(GenerationKind::Segment);
        let incoming_info = self
            .scheduler
            .schedule(incoming, 0, loaded.source, segment_generation);
        self.scheduler.set_volume(incoming, 0.0);
        self.scheduler.start(incoming);

        let session = CrossfadeSession {
            generation: pending.generation,
            duration_secs,
            steps: step_count(duration_secs),
            step: 0,
            target_index: pending.target_index,
            target: pending.target,
            incoming,
            incoming_info,
            origin: pending.origin,
            previous_track,
            previous_index,
        };
        spawn_step_timer(
            self.tx.clone(),
            self.guard.clone(),
            GenerationKind::Crossfade,
            session.generation,
            session.steps,
            session.step_interval(),
            ramp_step,
        );

        info!(
            "Crossfading to '{}' on slot {} over {:.2}s in {} steps",
            session.target.title, incoming, duration_secs, session.steps
        );
        if let Some(from) = &session.previous_track {
            self.shared.emit(TransportEvent::CrossfadeStarted {
                from_track_id: from.id,
                to_track_id: session.target.id,
                duration_secs,
                timestamp: time::now(),
            });
        }
        self.crossfade = Some(session);
    }

    pub(super) fn on_ramp_step(&mut self, generation: u64, step: u32) {
        let Some(session) = self.crossfade.as_mut() else {
            debug!("Ramp step {} with no crossfade", step);
            return;
        };
        if session.generation != generation
            || !self.guard.is_current(GenerationKind::Crossfade, generation)
        {
            debug!("Discarding stale ramp step {} (generation {})", step, generation);
            return;
        }

        session.step = step;
        let (incoming_volume, outgoing_volume) = session.volumes_at(step);
        let incoming = session.incoming;
        let last = session.is_last_step(step);
        self.scheduler.set_volume(incoming, incoming_volume);
        self.scheduler.set_volume(incoming.other(), outgoing_volume);

        if last {
            self.complete_crossfade();
        }
    }

    /// Swap roles and release the outgoing slot
    fn complete_crossfade(&mut self) {
        let Some(session) = self.crossfade.take() else {
            return;
        };
        self.guard.advance(GenerationKind::Crossfade);

        let outgoing = self.scheduler.active();
        self.scheduler.swap_roles();
        self.scheduler.retire(outgoing);
        self.scheduler.set_volume(session.incoming, 1.0);

        let info = session.incoming_info;
        self.position.set_duration(info.duration_secs());
        self.position.rebase(0.0, info.sample_rate);
        self.source = SourceState::Ready(info);
        self.crossfade_declined = false;
        self.refresh_position();

        info!("Crossfade to '{}' complete", session.target.title);
        self.shared.emit(TransportEvent::CrossfadeCompleted {
            track_id: session.target.id,
            timestamp: time::now(),
        });
        self.save_snapshot();

        // Tracks shorter than the ramp end before it does
        if self.scheduler.is_finished(session.incoming) {
            self.handle_natural_end();
        }
    }

    /// Snap a running crossfade to completion
    pub(super) fn commit_crossfade(&mut self) {
        if let Some(session) = &self.crossfade {
            debug!(
                "Committing crossfade at step {}/{}",
                session.step, session.steps
            );
            self.complete_crossfade();
        }
    }

    /// The incoming side failed during the ramp
    pub(super) fn abort_active_crossfade(&mut self, reason: CrossfadeAbort) {
        let Some(session) = self.crossfade.take() else {
            return;
        };
        self.guard.advance(GenerationKind::Crossfade);
        self.scheduler.retire(session.incoming);

        let active = self.scheduler.active();
        self.scheduler.set_volume(active, 1.0);
        // The outgoing segment was made stale when the crossfade armed
        let generation = self.guard.advance(GenerationKind::Segment);
        let finished = self.scheduler.retag(active, generation).unwrap_or(true);

        self.queue.set_index(session.previous_index);
        self.set_current_track(session.previous_track.clone());

        self.crossfade_failed(session.origin, session.target_index, &session.target, reason);
        if finished && session.origin == CrossfadeOrigin::Auto {
            self.handle_natural_end();
        }
    }

    /// Report an abandoned crossfade and apply the fallback
    ///
    /// Automatic crossfades let the current track play out and advance
    /// with a hard cut at its end; user-requested ones cut over now.
    fn crossfade_failed(
        &mut self,
        origin: CrossfadeOrigin,
        target_index: usize,
        target: &Track,
        reason: CrossfadeAbort,
    ) {
        warn!("Crossfade to '{}' aborted: {}", target.title, reason);
        self.shared.emit(TransportEvent::CrossfadeAborted {
            target_track_id: target.id,
            reason: reason.to_string(),
            timestamp: time::now(),
        });
        match origin {
            CrossfadeOrigin::Auto => self.crossfade_declined = true,
            CrossfadeOrigin::User => self.hard_switch(target_index, true),
        }
    }

    pub(super) fn emit_unavailable(&self, track: &Track, error: &LoadError) {
        self.shared.emit(TransportEvent::TrackUnavailable {
            track_id: track.id,
            reason: error.to_string(),
            timestamp: time::now(),
        });
    }
}
