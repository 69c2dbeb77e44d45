//! Render graph: two slots mixed into one output
//!
//! The render thread only touches the per-slot mutexes and the master gain.
//! End-of-segment and read failures are posted to the owner queue as
//! `RenderEvent`s tagged with the segment's generation.

use super::events::{EngineMessage, RenderEvent};
use super::types::SlotId;
use crate::audio::source::AudioSource;
use crate::session::OutputFormat;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// A source armed on a slot
#[derive(Debug)]
pub(crate) struct Segment {
    pub generation: u64,
    pub source: AudioSource,
    /// Frame the segment was armed from
    pub start_frame: u64,
    /// Frames rendered since arming
    pub rendered: u64,
    pub finished: bool,
}

#[derive(Debug, Default)]
struct SlotNode {
    segment: Option<Segment>,
    volume: f32,
    running: bool,
}

/// Point-in-time view of one slot
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSnapshot {
    pub track_id: Option<Uuid>,
    pub generation: Option<u64>,
    pub running: bool,
    pub volume: f32,
    pub rendered_frames: u64,
    pub finished: bool,
}

impl SlotSnapshot {
    pub fn is_loaded(&self) -> bool {
        self.track_id.is_some()
    }
}

pub struct RenderGraph {
    slots: [Mutex<SlotNode>; 2],
    master_gain: Mutex<f32>,
    format: Mutex<OutputFormat>,
    events: mpsc::UnboundedSender<EngineMessage>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RenderGraph {
    pub(crate) fn new(
        format: OutputFormat,
        events: mpsc::UnboundedSender<EngineMessage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            slots: [Mutex::default(), Mutex::default()],
            master_gain: Mutex::new(1.0),
            format: Mutex::new(format),
            events,
        })
    }

    fn slot(&self, slot: SlotId) -> MutexGuard<'_, SlotNode> {
        lock(&self.slots[slot.index()])
    }

    pub fn format(&self) -> OutputFormat {
        *lock(&self.format)
    }

    pub(crate) fn set_format(&self, format: OutputFormat) {
        *lock(&self.format) = format;
    }

    pub fn master_gain(&self) -> f32 {
        *lock(&self.master_gain)
    }

    pub(crate) fn set_master_gain(&self, gain: f32) {
        *lock(&self.master_gain) = gain.clamp(0.0, 1.0);
    }

    pub fn slot_snapshot(&self, slot: SlotId) -> SlotSnapshot {
        let node = self.slot(slot);
        SlotSnapshot {
            track_id: node.segment.as_ref().map(|s| s.source.track_id()),
            generation: node.segment.as_ref().map(|s| s.generation),
            running: node.running,
            volume: node.volume,
            rendered_frames: node.segment.as_ref().map(|s| s.rendered).unwrap_or(0),
            finished: node.segment.as_ref().map(|s| s.finished).unwrap_or(false),
        }
    }

    /// Manual renderer over this graph (the render thread owns another)
    pub fn renderer(self: &Arc<Self>) -> Renderer {
        Renderer::new(Arc::clone(self))
    }

    /// Replace the slot's segment, returning the previous one
    ///
    /// The caller drops the returned segment outside the lock.
    pub(crate) fn install(&self, slot: SlotId, segment: Segment) -> Option<Segment> {
        self.slot(slot).segment.replace(segment)
    }

    /// Stop the slot and take its segment
    pub(crate) fn clear(&self, slot: SlotId) -> Option<Segment> {
        let mut node = self.slot(slot);
        node.running = false;
        node.volume = 0.0;
        node.segment.take()
    }

    pub(crate) fn set_running(&self, slot: SlotId, running: bool) {
        self.slot(slot).running = running;
    }

    pub(crate) fn set_volume(&self, slot: SlotId, volume: f32) {
        self.slot(slot).volume = volume.clamp(0.0, 1.0);
    }

    pub(crate) fn with_segment<R>(
        &self,
        slot: SlotId,
        f: impl FnOnce(&mut Segment) -> R,
    ) -> Option<R> {
        self.slot(slot).segment.as_mut().map(f)
    }

    fn post(&self, event: RenderEvent) {
        // The owner may already be gone during shutdown
        let _ = self.events.send(EngineMessage::Render(event));
    }
}

/// Mixes the graph into interleaved output buffers
pub struct Renderer {
    graph: Arc<RenderGraph>,
    scratch: Vec<f32>,
    out: Vec<f32>,
}

impl Renderer {
    fn new(graph: Arc<RenderGraph>) -> Self {
        Self {
            graph,
            scratch: Vec::new(),
            out: Vec::new(),
        }
    }

    pub fn graph(&self) -> &Arc<RenderGraph> {
        &self.graph
    }

    /// Render `frames` frames in the current output format
    pub fn render_frames(&mut self, frames: usize) -> &[f32] {
        let channels = self.graph.format().channels.max(1) as usize;
        let mut out = std::mem::take(&mut self.out);
        out.resize(frames * channels, 0.0);
        self.render_with_channels(&mut out, channels);
        self.out = out;
        &self.out
    }

    /// Fill `out` (interleaved, output channel count) with the mix
    pub fn render(&mut self, out: &mut [f32]) {
        let channels = self.graph.format().channels.max(1) as usize;
        self.render_with_channels(out, channels);
    }

    fn render_with_channels(&mut self, out: &mut [f32], out_ch: usize) {
        out.fill(0.0);
        let frames = out.len() / out_ch;
        let mut events = Vec::new();

        for slot in [SlotId::A, SlotId::B] {
            let mut node = self.graph.slot(slot);
            if !node.running {
                continue;
            }
            let volume = node.volume;
            let Some(segment) = node.segment.as_mut() else {
                continue;
            };
            if segment.finished {
                continue;
            }

            let src_ch = segment.source.channels().max(1) as usize;
            self.scratch.resize(frames * src_ch, 0.0);

            let mut filled = 0usize;
            let mut failure = None;
            while filled < frames {
                match segment.source.read(&mut self.scratch[filled * src_ch..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) => {
                        failure = Some(e.to_string());
                        break;
                    }
                }
            }

            for frame in 0..filled {
                let src = &self.scratch[frame * src_ch..(frame + 1) * src_ch];
                let dst = &mut out[frame * out_ch..(frame + 1) * out_ch];
                for (ch, sample) in dst.iter_mut().enumerate() {
                    *sample += src[ch % src_ch] * volume;
                }
            }
            segment.rendered += filled as u64;

            if let Some(reason) = failure {
                warn!("Slot {} source failed: {}", slot, reason);
                segment.finished = true;
                events.push(RenderEvent::SegmentFailed {
                    generation: segment.generation,
                    slot,
                    reason,
                });
            } else if filled < frames {
                segment.finished = true;
                events.push(RenderEvent::SegmentFinished {
                    generation: segment.generation,
                    slot,
                });
            }
        }

        let gain = self.graph.master_gain();
        if gain < 1.0 {
            for sample in out.iter_mut() {
                *sample *= gain;
            }
        }

        for event in events {
            self.graph.post(event);
        }
    }
}
