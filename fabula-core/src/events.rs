//! Per-turn event stream pushed to clients.
//!
//! Events go out in source order over an unbounded channel. Delivery is
//! fire-and-forget: a client that disconnected mid-turn stops receiving,
//! but the turn keeps running so the transcript and mission state stay
//! complete.

use crate::mission::Mission;
use crate::steps::NarrativeStep;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

/// One event in a turn's ordered output stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Verbatim model tokens, forwarded as they arrive.
    RawText { text: String },

    /// A classified step. `incremental` steps were emitted mid-stream;
    /// the rest came from the final pass.
    Step {
        step: NarrativeStep,
        incremental: bool,
    },

    /// The action was refused because a story mission blocks the
    /// storyline.
    Blocked { mission: Mission },

    /// The story-mission policy fired; a collaborator should generate and
    /// create one.
    StoryMissionRequested,

    /// A mission entered the session.
    MissionCreated { mission: Mission },

    /// A mission left the active state (completed or abandoned).
    MissionResolved { mission: Mission },

    /// The turn finished; total count plus the full step array.
    Complete {
        count: usize,
        steps: Vec<NarrativeStep>,
    },

    /// The turn failed upstream; whatever streamed before the failure has
    /// been persisted.
    Error { message: String },
}

/// Fire-and-forget, order-preserving push channel to one client.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl EventSink {
    /// A sink backed by a channel sender.
    pub fn new(tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops everything, for callers that only want the turn's
    /// side effects.
    pub fn null() -> Self {
        Self { tx: None }
    }

    /// Create a sink together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Push an event. A closed receiver (client gone) is not an error;
    /// the turn must run to completion regardless.
    pub fn push(&self, event: TurnEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                trace!("event receiver dropped, continuing without pushes");
            }
        }
    }
}
