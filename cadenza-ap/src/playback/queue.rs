//! Playback queue
//!
//! Ordered tracks plus the current index, shuffle flag and loop mode.
//! Invariant: `index < len` whenever the queue is non-empty, `index == 0`
//! when it is empty.

use super::types::Track;
use cadenza_common::events::LoopMode;
use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct PlaybackQueue {
    tracks: Vec<Track>,
    /// Unshuffled order, kept while shuffle is on
    original: Vec<Track>,
    index: usize,
    shuffled: bool,
    loop_mode: LoopMode,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents, selecting `index` (clamped into range)
    ///
    /// When shuffle is on the new contents are shuffled with the selected
    /// track first.
    pub fn replace<R: Rng + ?Sized>(&mut self, tracks: Vec<Track>, index: usize, rng: &mut R) {
        self.tracks = tracks;
        self.index = if self.tracks.is_empty() {
            0
        } else {
            index.min(self.tracks.len() - 1)
        };
        self.original.clear();
        if self.shuffled {
            self.shuffle_remaining(rng);
        }
    }

    /// Reinstate a persisted queue as-is
    ///
    /// A restored shuffled queue keeps its order; the pre-shuffle order is
    /// not persisted, so toggling shuffle off afterwards leaves it unchanged.
    pub fn restore(&mut self, tracks: Vec<Track>, index: usize, loop_mode: LoopMode, shuffled: bool) {
        self.tracks = tracks;
        self.original.clear();
        self.index = if self.tracks.is_empty() {
            0
        } else {
            index.min(self.tracks.len() - 1)
        };
        self.loop_mode = loop_mode;
        self.shuffled = shuffled;
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.original.clear();
        self.index = 0;
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_ids(&self) -> Vec<Uuid> {
        self.tracks.iter().map(|t| t.id).collect()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.index)
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    /// Select `index`; returns false (unchanged) if out of range
    pub fn set_index(&mut self, index: usize) -> bool {
        if index < self.tracks.len() {
            self.index = index;
            true
        } else {
            false
        }
    }

    pub fn position_of(&self, track_id: Uuid) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == track_id)
    }

    /// Target for a user "next": always wraps
    pub fn next_index(&self) -> Option<usize> {
        self.next_after(self.index)
    }

    /// Target for a user "previous": always wraps
    pub fn previous_index(&self) -> Option<usize> {
        self.previous_before(self.index)
    }

    /// Wrapping successor of `index`
    pub fn next_after(&self, index: usize) -> Option<usize> {
        if self.tracks.is_empty() {
            None
        } else {
            Some((index.min(self.tracks.len() - 1) + 1) % self.tracks.len())
        }
    }

    /// Wrapping predecessor of `index`
    pub fn previous_before(&self, index: usize) -> Option<usize> {
        match self.tracks.len() {
            0 => None,
            len if index == 0 || index >= len => Some(len - 1),
            _ => Some(index - 1),
        }
    }

    /// Target when the current track ends on its own
    ///
    /// `Song` repeats the current index, `Queue` wraps, `Off` returns None
    /// past the last track.
    pub fn natural_next_index(&self) -> Option<usize> {
        if self.tracks.is_empty() {
            return None;
        }
        match self.loop_mode {
            LoopMode::Song => Some(self.index),
            LoopMode::Queue => Some((self.index + 1) % self.tracks.len()),
            LoopMode::Off => {
                let next = self.index + 1;
                (next < self.tracks.len()).then_some(next)
            }
        }
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffled
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    pub fn cycle_loop_mode(&mut self) -> LoopMode {
        self.loop_mode = self.loop_mode.cycled();
        self.loop_mode
    }

    /// Toggle shuffle, keeping the current track selected
    pub fn toggle_shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        self.set_shuffle(!self.shuffled, rng);
        self.shuffled
    }

    pub fn set_shuffle<R: Rng + ?Sized>(&mut self, on: bool, rng: &mut R) {
        if on == self.shuffled {
            return;
        }
        self.shuffled = on;
        if on {
            self.shuffle_remaining(rng);
        } else {
            self.unshuffle();
        }
    }

    /// Current track first, the rest in random order
    fn shuffle_remaining<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.original = self.tracks.clone();
        if self.tracks.is_empty() {
            return;
        }
        let current = self.tracks.remove(self.index);
        self.tracks.shuffle(rng);
        self.tracks.insert(0, current);
        self.index = 0;
    }

    fn unshuffle(&mut self) {
        if self.original.is_empty() {
            return;
        }
        let current_id = self.current().map(|t| t.id);
        self.tracks = std::mem::take(&mut self.original);
        self.index = current_id
            .and_then(|id| self.position_of(id))
            .unwrap_or(0);
    }
}
