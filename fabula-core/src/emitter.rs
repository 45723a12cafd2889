//! Incremental step emission over a growing text buffer.
//!
//! The narrator streams tokens; after each chunk the accumulated buffer is
//! reclassified and any step not yet sent is emitted. The final step in the
//! list is withheld while the buffer does not end on a clean marker
//! boundary, because the next chunk could still extend it. A final pass at
//! stream end flushes whatever is pending.
//!
//! Emission guarantees: each step index is emitted at most once, in source
//! order. If classification fails (runaway marker), the emitter degrades to
//! raw-text-only for the rest of the turn instead of aborting the stream.

use crate::steps::{self, NarrativeStep};
use tracing::warn;

/// Tracks which classified steps have already been sent for one turn.
#[derive(Debug, Default)]
pub struct StepEmitter {
    sent: usize,
    degraded: bool,
}

impl StepEmitter {
    /// Create an emitter for a fresh turn.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of steps emitted so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Whether structured emission has been abandoned for this turn.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Reclassify the accumulated buffer after a chunk arrived and return
    /// the steps that are safe to emit now.
    pub fn on_chunk(&mut self, buffer: &str) -> Vec<NarrativeStep> {
        if self.degraded {
            return Vec::new();
        }

        let all = match steps::classify(buffer) {
            Ok(all) => all,
            Err(e) => {
                warn!(error = %e, "classification failed, degrading to raw text");
                self.degraded = true;
                return Vec::new();
            }
        };

        // The last step may still grow; hold it back unless the buffer
        // ends exactly on a marker boundary.
        let mut safe = all.len();
        if !steps::ends_on_boundary(buffer) && safe > self.sent {
            safe -= 1;
        }

        self.take_from(all, safe)
    }

    /// Final pass at stream end: emit everything still pending.
    pub fn finish(&mut self, buffer: &str) -> Vec<NarrativeStep> {
        if self.degraded {
            return Vec::new();
        }

        let all = match steps::classify(buffer) {
            Ok(all) => all,
            Err(e) => {
                warn!(error = %e, "classification failed on final pass");
                self.degraded = true;
                return Vec::new();
            }
        };

        let safe = all.len();
        self.take_from(all, safe)
    }

    fn take_from(&mut self, all: Vec<NarrativeStep>, safe: usize) -> Vec<NarrativeStep> {
        if safe <= self.sent {
            return Vec::new();
        }
        let emitted: Vec<NarrativeStep> = all.into_iter().take(safe).skip(self.sent).collect();
        self.sent = safe;
        emitted
    }
}
