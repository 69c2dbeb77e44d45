//! Dual-slot scheduler
//!
//! Owns the two alternating output paths and which one is active. Only the
//! owner task calls into the scheduler; the render thread sees the slots
//! through the shared `RenderGraph`.

use super::render::{RenderGraph, Segment, SlotSnapshot};
use super::types::SlotId;
use crate::audio::source::{AudioSource, SourceInfo};
use crate::session::OutputFormat;
use std::sync::Arc;
use tracing::debug;

pub struct DualNodeScheduler {
    graph: Arc<RenderGraph>,
    active: SlotId,
}

impl DualNodeScheduler {
    pub fn new(graph: Arc<RenderGraph>) -> Self {
        Self {
            graph,
            active: SlotId::A,
        }
    }

    pub fn graph(&self) -> &Arc<RenderGraph> {
        &self.graph
    }

    pub fn active(&self) -> SlotId {
        self.active
    }

    pub fn inactive(&self) -> SlotId {
        self.active.other()
    }

    /// Arm `slot` to render `[from_frame, frame_length)` of `source`
    ///
    /// The slot is left stopped at volume 0; the caller decides when it
    /// runs. Any source previously on the slot is released.
    pub fn schedule(&mut self, slot: SlotId, from_frame: u64, mut source: AudioSource, generation: u64) -> SourceInfo {
        let from_frame = from_frame.min(source.frame_length());
        source.seek(from_frame);
        let info = source.info();
        debug!(
            "Arming slot {} from frame {} (generation {})",
            slot, from_frame, generation
        );
        self.graph.set_running(slot, false);
        self.graph.set_volume(slot, 0.0);
        let previous = self.graph.install(
            slot,
            Segment {
                generation,
                source,
                start_frame: from_frame,
                rendered: 0,
                finished: false,
            },
        );
        drop(previous);
        info
    }

    /// Re-arm the source already on `slot` from another frame
    ///
    /// Returns false if the slot holds no source.
    pub fn reschedule(&mut self, slot: SlotId, from_frame: u64, generation: u64) -> bool {
        self.graph
            .with_segment(slot, |segment| {
                let frame = from_frame.min(segment.source.frame_length());
                segment.source.seek(frame);
                segment.start_frame = frame;
                segment.rendered = 0;
                segment.finished = false;
                segment.generation = generation;
            })
            .is_some()
    }

    /// Move the slot's segment to a new generation without touching its
    /// cursor; returns whether it has already finished
    pub fn retag(&mut self, slot: SlotId, generation: u64) -> Option<bool> {
        self.graph.with_segment(slot, |segment| {
            segment.generation = generation;
            segment.finished
        })
    }

    pub fn start(&mut self, slot: SlotId) {
        self.graph.set_running(slot, true);
    }

    pub fn halt(&mut self, slot: SlotId) {
        self.graph.set_running(slot, false);
    }

    pub fn set_volume(&mut self, slot: SlotId, volume: f32) {
        self.graph.set_volume(slot, volume);
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.graph.set_master_gain(gain);
    }

    pub fn set_output_format(&mut self, format: OutputFormat) {
        self.graph.set_format(format);
    }

    /// Stop the slot and release its source
    pub fn retire(&mut self, slot: SlotId) {
        if let Some(segment) = self.graph.clear(slot) {
            debug!(
                "Retired slot {} (track {})",
                slot,
                segment.source.track_id()
            );
        }
    }

    pub fn retire_all(&mut self) {
        self.retire(SlotId::A);
        self.retire(SlotId::B);
    }

    /// Make the inactive slot active
    pub fn swap_roles(&mut self) -> SlotId {
        self.active = self.active.other();
        self.active
    }

    /// Frames rendered by `slot` since it was last armed
    pub fn rendered_frames(&self, slot: SlotId) -> u64 {
        self.graph.slot_snapshot(slot).rendered_frames
    }

    pub fn is_finished(&self, slot: SlotId) -> bool {
        self.graph.slot_snapshot(slot).finished
    }

    pub fn snapshot(&self, slot: SlotId) -> SlotSnapshot {
        self.graph.slot_snapshot(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::PcmSource;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn scheduler() -> DualNodeScheduler {
        let (tx, _rx) = mpsc::unbounded_channel();
        DualNodeScheduler::new(RenderGraph::new(OutputFormat::default(), tx))
    }

    fn source(secs: f64) -> AudioSource {
        let pcm = PcmSource::constant(0.2, secs, 44_100, 2).unwrap();
        AudioSource::new(Uuid::new_v4(), Box::new(pcm))
    }

    #[test]
    fn test_schedule_leaves_slot_stopped() {
        let mut s = scheduler();
        let info = s.schedule(SlotId::A, 100, source(1.0), 4);
        assert_eq!(info.frame_length, 44_100);

        let snap = s.snapshot(SlotId::A);
        assert!(snap.is_loaded());
        assert!(!snap.running);
        assert_eq!(snap.volume, 0.0);
        assert_eq!(snap.generation, Some(4));
    }

    #[test]
    fn test_reschedule_resets_render_count() {
        let mut s = scheduler();
        s.schedule(SlotId::A, 0, source(1.0), 1);
        s.set_volume(SlotId::A, 1.0);
        s.start(SlotId::A);
        s.graph().renderer().render_frames(512);
        assert_eq!(s.rendered_frames(SlotId::A), 512);

        assert!(s.reschedule(SlotId::A, 22_050, 2));
        assert_eq!(s.rendered_frames(SlotId::A), 0);
        assert_eq!(s.snapshot(SlotId::A).generation, Some(2));
        assert!(!s.reschedule(SlotId::B, 0, 3));
    }

    #[test]
    fn test_swap_and_retire() {
        let mut s = scheduler();
        s.schedule(SlotId::A, 0, source(1.0), 1);
        s.schedule(SlotId::B, 0, source(1.0), 2);
        assert_eq!(s.active(), SlotId::A);
        assert_eq!(s.swap_roles(), SlotId::B);
        s.retire(SlotId::A);
        assert!(!s.snapshot(SlotId::A).is_loaded());
        assert!(s.snapshot(SlotId::B).is_loaded());
    }
}
