//! Generation counters invalidating stale asynchronous work
//!
//! Every deferred callback (segment completion, ramp step, fade step, load
//! result) captures the relevant counter when it is dispatched and is
//! dropped on arrival if the counter has moved on. Counters are atomics so
//! that timer tasks can stop early without a round trip to the owner task.

use std::sync::atomic::{AtomicU64, Ordering};

/// Which family of deferred work a token belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationKind {
    /// Scheduled segments and primary loads
    Segment,
    /// Crossfade ramps and crossfade-lane loads
    Crossfade,
    /// Simple volume fades
    Fade,
}

#[derive(Debug, Default)]
pub struct GenerationGuard {
    segment: AtomicU64,
    crossfade: AtomicU64,
    fade: AtomicU64,
}

impl GenerationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, kind: GenerationKind) -> &AtomicU64 {
        match kind {
            GenerationKind::Segment => &self.segment,
            GenerationKind::Crossfade => &self.crossfade,
            GenerationKind::Fade => &self.fade,
        }
    }

    pub fn current(&self, kind: GenerationKind) -> u64 {
        self.counter(kind).load(Ordering::Acquire)
    }

    /// Invalidate all outstanding tokens of `kind`, returning the new value
    pub fn advance(&self, kind: GenerationKind) -> u64 {
        self.counter(kind).fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_current(&self, kind: GenerationKind, token: u64) -> bool {
        self.current(kind) == token
    }
}
