//! Testing utilities for the narrative runtime.
//!
//! This module provides tools for integration testing:
//! - `mock_stream` / `failing_stream` for deterministic model output
//! - `TestHarness` for scripted session scenarios over a temp store
//!
//! Nothing here touches the network; turns are driven through the same
//! [`Session::run_stream`] pipeline the engine uses.

use crate::events::{EventSink, TurnEvent};
use crate::mission::MissionStore;
use crate::player::PlayerState;
use crate::session::{Session, TurnOutcome};
use crate::store::{SessionManifest, SessionStore, StyleConfig, TranscriptEntry};
use crate::world::WorldBundle;
use chrono::Utc;
use fabula_model::StreamEvent;
use futures::stream;
use futures::Stream;
use tempfile::TempDir;

/// A scripted model stream: each chunk arrives as one `Delta`, followed
/// by `Done`.
pub fn mock_stream(
    chunks: &[&str],
) -> impl Stream<Item = Result<StreamEvent, fabula_model::Error>> + Unpin {
    let events: Vec<_> = chunks
        .iter()
        .map(|c| {
            Ok(StreamEvent::Delta {
                text: (*c).to_string(),
            })
        })
        .chain(std::iter::once(Ok(StreamEvent::Done)))
        .collect();
    stream::iter(events)
}

/// A stream that yields some chunks and then fails upstream, never
/// reaching `Done`.
pub fn failing_stream(
    chunks: &[&str],
    message: &str,
) -> impl Stream<Item = Result<StreamEvent, fabula_model::Error>> + Unpin {
    let events: Vec<_> = chunks
        .iter()
        .map(|c| {
            Ok(StreamEvent::Delta {
                text: (*c).to_string(),
            })
        })
        .chain(std::iter::once(Ok(StreamEvent::Error {
            message: message.to_string(),
        })))
        .collect();
    stream::iter(events)
}

/// A scripted session over a temp-dir store.
///
/// Turns run through the real pipeline (gate, emitter, state updates)
/// with mock model streams, and every turn is persisted like the engine
/// would.
pub struct TestHarness {
    pub session: Session,
    pub store: SessionStore,
    // Held so the store directory outlives the harness.
    _dir: TempDir,
}

impl TestHarness {
    /// Create a harness with an empty world.
    pub async fn new(session_id: &str) -> Self {
        Self::with_world(session_id, WorldBundle::new()).await
    }

    /// Create a harness around a specific world bundle.
    pub async fn with_world(session_id: &str, world: WorldBundle) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store = SessionStore::new(dir.path());

        let session = Session::new(SessionManifest {
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            style: StyleConfig::default(),
            source_template: None,
            world,
        });
        store
            .create_session(&session.manifest, &session.player, &session.missions)
            .await
            .expect("create session");

        Self {
            session,
            store,
            _dir: dir,
        }
    }

    /// Run one turn against scripted model chunks, collecting every
    /// pushed event. A blocked turn short-circuits like the engine does.
    pub async fn run_turn(&mut self, input: &str, chunks: &[&str]) -> (TurnOutcome, Vec<TurnEvent>) {
        let (sink, mut rx) = EventSink::channel();

        if let Some(mission) = self.session.begin_turn() {
            sink.push(TurnEvent::Blocked {
                mission: mission.clone(),
            });
            self.persist().await;
            drop(sink);
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            let outcome = TurnOutcome {
                turn: self.session.missions.turn_count,
                text: crate::session::blocked_message(&mission),
                steps: Vec::new(),
                blocked: Some(mission),
                story_mission_requested: false,
                degraded: false,
                upstream_error: None,
            };
            return (outcome, events);
        }

        let outcome = self
            .session
            .run_stream(input, mock_stream(chunks), &sink)
            .await;
        self.persist().await;

        drop(sink);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    /// Run one turn whose stream fails upstream after the given chunks.
    pub async fn run_failing_turn(
        &mut self,
        input: &str,
        chunks: &[&str],
        message: &str,
    ) -> (TurnOutcome, Vec<TurnEvent>) {
        let (sink, mut rx) = EventSink::channel();
        let blocked = self.session.begin_turn();
        assert!(blocked.is_none(), "failing turn harness expects no gate");

        let outcome = self
            .session
            .run_stream(input, failing_stream(chunks, message), &sink)
            .await;
        self.persist().await;

        drop(sink);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    /// Persist status, missions, and transcript like the engine does
    /// after each turn.
    pub async fn persist(&self) {
        self.store
            .save_status(&self.session.id, &self.session.player)
            .await
            .expect("save status");
        self.store
            .save_missions(&self.session.id, &self.session.missions)
            .await
            .expect("save missions");
        self.store
            .save_transcript(&self.session.id, &self.session.transcript)
            .await
            .expect("save transcript");
    }

    /// Rebuild the session from disk, as a restart would.
    pub async fn recover(&self) -> Session {
        crate::recovery::recover(&self.store, &self.session.id)
            .await
            .expect("recover")
    }

    pub fn player(&self) -> &PlayerState {
        &self.session.player
    }

    pub fn missions(&self) -> &MissionStore {
        &self.session.missions
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.session.transcript
    }
}

/// The serialized `kind` tag of an event, as clients see it.
pub fn event_kind(event: &TurnEvent) -> &'static str {
    match event {
        TurnEvent::RawText { .. } => "raw_text",
        TurnEvent::Step { .. } => "step",
        TurnEvent::Blocked { .. } => "blocked",
        TurnEvent::StoryMissionRequested => "story_mission_requested",
        TurnEvent::MissionCreated { .. } => "mission_created",
        TurnEvent::MissionResolved { .. } => "mission_resolved",
        TurnEvent::Complete { .. } => "complete",
        TurnEvent::Error { .. } => "error",
    }
}

/// Assert the exact kind sequence of a turn's events.
pub fn assert_event_kinds(events: &[TurnEvent], expected: &[&str]) {
    let kinds: Vec<_> = events.iter().map(event_kind).collect();
    assert_eq!(kinds, expected, "event kind sequence mismatch");
}

/// Assert how many step events (incremental or final) a turn pushed.
pub fn assert_step_count(events: &[TurnEvent], expected: usize) {
    let count = events
        .iter()
        .filter(|e| matches!(e, TurnEvent::Step { .. }))
        .count();
    assert_eq!(count, expected, "step event count mismatch");
}

/// Assert that the step events in `events` arrive in the same order as
/// the final `Complete` array.
pub fn assert_steps_ordered(events: &[TurnEvent]) {
    let streamed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Step { step, .. } => Some(step.clone()),
            _ => None,
        })
        .collect();
    let complete = events.iter().find_map(|e| match e {
        TurnEvent::Complete { steps, .. } => Some(steps.clone()),
        _ => None,
    });

    if let Some(complete) = complete {
        assert_eq!(
            streamed.len(),
            complete.len(),
            "streamed steps should match the final array"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_mock_stream_yields_chunks_then_done() {
        let events: Vec<_> = mock_stream(&["a", "b"]).collect().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0],
            Ok(StreamEvent::Delta { ref text }) if text == "a"
        ));
        assert!(matches!(events[2], Ok(StreamEvent::Done)));
    }

    #[tokio::test]
    async fn test_failing_stream_ends_with_error() {
        let events: Vec<_> = failing_stream(&["a"], "boom").collect().await;
        assert!(matches!(
            events.last(),
            Some(Ok(StreamEvent::Error { ref message })) if message == "boom"
        ));
    }

    #[tokio::test]
    async fn test_harness_runs_a_turn() {
        let mut harness = TestHarness::new("t1").await;
        let (outcome, events) = harness
            .run_turn("look around", &["[NARRATION: A quiet road.]"])
            .await;

        assert!(outcome.blocked.is_none());
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(harness.transcript().len(), 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, TurnEvent::Complete { count: 1, .. })));
    }
}
