//! Sessions and the narrative turn engine.
//!
//! A [`Session`] is the in-memory runtime state for one player: manifest
//! (style + world), player state, mission record, and transcript. The
//! [`NarrativeEngine`] is the primary public API: it owns the model
//! client, the artifact store, and the session cache, and drives the
//! per-turn pipeline - storyline gate, model stream, incremental step
//! emission, state updates, persistence.
//!
//! Concurrency: each cached session lives behind a `tokio::sync::Mutex`;
//! the engine holds that lock for the whole turn, so actions on one
//! session are serialized while other sessions proceed freely.

use crate::cache::SessionCache;
use crate::emitter::StepEmitter;
use crate::events::{EventSink, TurnEvent};
use crate::mission::{Mission, MissionDef, MissionError, MissionStore, SubmissionOutcome};
use crate::player::PlayerState;
use crate::recovery;
use crate::steps::{self, NarrativeStep};
use crate::store::{SessionManifest, SessionStore, StoreError, StyleConfig, TranscriptEntry};
use crate::world::WorldBundle;
use chrono::Utc;
use fabula_model::{Message, ModelClient, Request, StreamEvent};
use futures::{Stream, StreamExt};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How many transcript turns are replayed to the model.
pub const CONVERSATION_WINDOW: usize = 20;

const BASE_PROMPT: &str = include_str!("prompts/narrator_base.txt");

/// Errors from engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("Model error: {0}")]
    Model(#[from] fabula_model::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Mission error: {0}")]
    Mission(#[from] MissionError),

    #[error("Generation failed upstream: {0}")]
    Upstream(String),
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for session artifacts.
    pub data_dir: PathBuf,

    /// Maximum tokens per narrator response.
    pub max_tokens: usize,

    /// Generation temperature.
    pub temperature: Option<f32>,
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_tokens: 4096,
            temperature: Some(0.8),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// In-memory runtime state for one player's session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub manifest: SessionManifest,
    pub player: PlayerState,
    pub missions: MissionStore,
    /// Full transcript; the model only sees the trailing window.
    pub transcript: Vec<TranscriptEntry>,
}

impl Session {
    /// Create a fresh session from a manifest. Initially unlocked scenes
    /// come from the world bundle.
    pub fn new(manifest: SessionManifest) -> Self {
        let mut player = PlayerState::new();
        for scene in manifest.world.initial_scenes() {
            player.unlocked_scenes.insert(scene.to_string());
        }
        Self {
            id: manifest.session_id.clone(),
            manifest,
            player,
            missions: MissionStore::new(),
            transcript: Vec::new(),
        }
    }

    /// Rebuild a session from recovered artifacts.
    pub fn from_parts(
        manifest: SessionManifest,
        player: PlayerState,
        missions: MissionStore,
        transcript: Vec<TranscriptEntry>,
    ) -> Self {
        Self {
            id: manifest.session_id.clone(),
            manifest,
            player,
            missions,
            transcript,
        }
    }

    /// The trailing conversation window fed back to the model, oldest
    /// first.
    pub fn conversation_window(&self) -> Vec<Message> {
        let start = self.transcript.len().saturating_sub(CONVERSATION_WINDOW);
        let mut messages = Vec::with_capacity((self.transcript.len() - start) * 2);
        for entry in &self.transcript[start..] {
            messages.push(Message::player(&entry.player));
            messages.push(Message::narrator(&entry.model));
        }
        messages
    }

    /// Advance the turn clock and apply the storyline gate.
    ///
    /// Returns the blocking mission when the main loop is refused; the
    /// model must not be contacted in that case.
    pub fn begin_turn(&mut self) -> Option<Mission> {
        self.missions.advance_turn();
        self.missions.blocking_mission().cloned()
    }

    /// Consume one turn's model stream: forward raw tokens, emit steps
    /// incrementally, apply state changes, append the transcript pair.
    ///
    /// Runs to completion even if the event sink's client is gone. An
    /// upstream failure ends consumption; the partial text is still
    /// recorded so the caller can persist it.
    pub async fn run_stream<S>(&mut self, input: &str, stream: S, sink: &EventSink) -> TurnOutcome
    where
        S: Stream<Item = Result<StreamEvent, fabula_model::Error>> + Unpin,
    {
        let mut stream = stream;
        let mut buffer = String::new();
        let mut emitter = StepEmitter::new();
        let mut upstream_error: Option<String> = None;

        while let Some(event) = stream.next().await {
            match event {
                Ok(StreamEvent::Delta { text }) => {
                    buffer.push_str(&text);
                    sink.push(TurnEvent::RawText { text });
                    for step in emitter.on_chunk(&buffer) {
                        sink.push(TurnEvent::Step {
                            step,
                            incremental: true,
                        });
                    }
                }
                Ok(StreamEvent::Done) => break,
                Ok(StreamEvent::Error { message }) => {
                    upstream_error = Some(message);
                    break;
                }
                Err(e) => {
                    upstream_error = Some(e.to_string());
                    break;
                }
            }
        }

        let turn = self.missions.turn_count;

        if let Some(message) = upstream_error {
            warn!(session_id = %self.id, error = %message, "model stream failed mid-turn");
            // Keep the partial text: the transcript must reflect what the
            // player saw, even for a failed turn. State deltas from a
            // truncated stream are not applied.
            self.transcript
                .push(TranscriptEntry::new(input, buffer.clone()));
            sink.push(TurnEvent::Error {
                message: message.clone(),
            });
            return TurnOutcome {
                turn,
                text: buffer,
                steps: Vec::new(),
                blocked: None,
                story_mission_requested: false,
                degraded: emitter.is_degraded(),
                upstream_error: Some(message),
            };
        }

        for step in emitter.finish(&buffer) {
            sink.push(TurnEvent::Step {
                step,
                incremental: false,
            });
        }

        // The complete array comes from one final classification so hints
        // carry every delta, including any attached after the hint itself
        // was emitted.
        let all = if emitter.is_degraded() {
            Vec::new()
        } else {
            steps::classify(&buffer).unwrap_or_default()
        };

        for step in &all {
            if let NarrativeStep::Hint { deltas, .. } = step {
                for delta in deltas {
                    self.player.apply_delta(delta);
                }
            }
        }

        let marker = steps::contains_mission_marker(&buffer);
        let story_mission_requested = self.missions.should_request_story_mission(marker);
        if story_mission_requested {
            debug!(session_id = %self.id, turn, marker, "story mission requested");
            sink.push(TurnEvent::StoryMissionRequested);
        }

        self.transcript
            .push(TranscriptEntry::new(input, buffer.clone()));

        sink.push(TurnEvent::Complete {
            count: all.len(),
            steps: all.clone(),
        });

        TurnOutcome {
            turn,
            text: buffer,
            steps: all,
            blocked: None,
            story_mission_requested,
            degraded: emitter.is_degraded(),
            upstream_error: None,
        }
    }
}

/// The fixed response returned while a story mission blocks the
/// storyline.
pub fn blocked_message(mission: &Mission) -> String {
    format!(
        "The story cannot move on yet: the mission \"{}\" must be completed or abandoned first.",
        mission.title
    )
}

/// Result of one player action.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Turn number this action was processed on.
    pub turn: u64,

    /// Full narrator text (or the fixed blocked message).
    pub text: String,

    /// Final classified steps, in order. Empty when blocked or degraded.
    pub steps: Vec<NarrativeStep>,

    /// The mission that refused the action, if the storyline is gated.
    pub blocked: Option<Mission>,

    /// Whether the story-mission policy fired this turn.
    pub story_mission_requested: bool,

    /// Whether structured emission was abandoned for this turn.
    pub degraded: bool,

    /// Upstream failure message, if the stream broke mid-turn.
    pub upstream_error: Option<String>,
}

impl TurnOutcome {
    fn blocked(turn: u64, mission: Mission) -> Self {
        Self {
            turn,
            text: blocked_message(&mission),
            steps: Vec::new(),
            blocked: Some(mission),
            story_mission_requested: false,
            degraded: false,
            upstream_error: None,
        }
    }
}

/// The narrative-session runtime: model client + artifact store + session
/// cache.
pub struct NarrativeEngine {
    client: ModelClient,
    store: SessionStore,
    cache: SessionCache,
    config: EngineConfig,
}

impl NarrativeEngine {
    pub fn new(client: ModelClient, config: EngineConfig) -> Self {
        Self {
            client,
            store: SessionStore::new(&config.data_dir),
            cache: SessionCache::new(),
            config,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Create a new session from collaborator-supplied world data, write
    /// its artifacts, and cache it.
    pub async fn create_session(
        &self,
        session_id: impl Into<String>,
        world: WorldBundle,
        style: StyleConfig,
        source_template: Option<String>,
    ) -> Result<(), EngineError> {
        let session_id = session_id.into();
        if self.store.exists(&session_id).await {
            return Err(EngineError::SessionExists(session_id));
        }

        let manifest = SessionManifest {
            session_id: session_id.clone(),
            created_at: Utc::now(),
            style,
            source_template,
            world,
        };
        let session = Session::new(manifest);

        self.store
            .create_session(&session.manifest, &session.player, &session.missions)
            .await?;
        info!(session_id = %session_id, "session created");
        self.cache.put(session).await;
        Ok(())
    }

    /// Fetch a session: cache hit, or recovery from disk artifacts.
    ///
    /// The cache entry is held across the miss, so concurrent callers for
    /// one id always share a single slot (single-writer discipline).
    pub async fn session(
        &self,
        session_id: &str,
    ) -> Result<std::sync::Arc<tokio::sync::Mutex<Session>>, EngineError> {
        self.cache
            .get_or_try_insert_with(session_id, || async {
                recovery::recover(&self.store, session_id)
                    .await
                    .map_err(|e| match e {
                        StoreError::NotFound { session_id, .. } => {
                            EngineError::SessionNotFound(session_id)
                        }
                        other => EngineError::Store(other),
                    })
            })
            .await
    }

    /// Process one player action: the main narrative loop.
    pub async fn player_action(
        &self,
        session_id: &str,
        input: &str,
        sink: &EventSink,
    ) -> Result<TurnOutcome, EngineError> {
        let slot = self.session(session_id).await?;
        let mut session = slot.lock().await;

        if let Some(mission) = session.begin_turn() {
            debug!(session_id, mission = %mission.title, "storyline blocked");
            sink.push(TurnEvent::Blocked {
                mission: mission.clone(),
            });
            // The turn clock moved; keep the record consistent on disk.
            self.store
                .save_missions(session_id, &session.missions)
                .await?;
            return Ok(TurnOutcome::blocked(session.missions.turn_count, mission));
        }

        let request = self.build_request(&session, input);
        let stream = match self.client.stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                sink.push(TurnEvent::Error {
                    message: e.to_string(),
                });
                return Err(EngineError::Model(e));
            }
        };

        let outcome = session.run_stream(input, stream, sink).await;
        self.persist_turn(&session).await?;

        if let Some(ref message) = outcome.upstream_error {
            return Err(EngineError::Upstream(message.clone()));
        }
        Ok(outcome)
    }

    /// Create a mission in a session (content authored by collaborators,
    /// typically after a `story_mission_requested` signal).
    pub async fn create_mission(
        &self,
        session_id: &str,
        def: MissionDef,
        sink: &EventSink,
    ) -> Result<Mission, EngineError> {
        let slot = self.session(session_id).await?;
        let mut session = slot.lock().await;

        let mission = session.missions.create(def)?.clone();
        self.store
            .save_missions(session_id, &session.missions)
            .await?;
        sink.push(TurnEvent::MissionCreated {
            mission: mission.clone(),
        });
        Ok(mission)
    }

    /// Submit a mission against the current player snapshot. On
    /// completion the reward is applied and state persisted.
    pub async fn submit_mission(
        &self,
        session_id: &str,
        mission_id: Uuid,
        sink: &EventSink,
    ) -> Result<SubmissionOutcome, EngineError> {
        let slot = self.session(session_id).await?;
        let mut session = slot.lock().await;

        let outcome = {
            // Split borrow: submit reads the player while mutating missions.
            let player = session.player.clone();
            session.missions.submit(mission_id, &player)?
        };

        if let SubmissionOutcome::Completed { ref reward, .. } = outcome {
            session.player.apply_reward(reward);
            if let Some(mission) = session.missions.get(mission_id) {
                sink.push(TurnEvent::MissionResolved {
                    mission: mission.clone(),
                });
            }
        }

        self.persist_turn(&session).await?;
        Ok(outcome)
    }

    /// Abandon a mission: terminal, clears the storyline block, grants
    /// nothing.
    pub async fn abandon_mission(
        &self,
        session_id: &str,
        mission_id: Uuid,
        sink: &EventSink,
    ) -> Result<(), EngineError> {
        let slot = self.session(session_id).await?;
        let mut session = slot.lock().await;

        session.missions.abandon(mission_id)?;
        if let Some(mission) = session.missions.get(mission_id) {
            sink.push(TurnEvent::MissionResolved {
                mission: mission.clone(),
            });
        }
        self.store
            .save_missions(session_id, &session.missions)
            .await?;
        Ok(())
    }

    /// Record that the player reached a location (collaborator-driven;
    /// the scene UI knows where the player went).
    pub async fn record_visit(
        &self,
        session_id: &str,
        location: &str,
    ) -> Result<(), EngineError> {
        let slot = self.session(session_id).await?;
        let mut session = slot.lock().await;
        session.player.visit(location);
        self.store.save_status(session_id, &session.player).await?;
        Ok(())
    }

    async fn persist_turn(&self, session: &Session) -> Result<(), EngineError> {
        self.store.save_status(&session.id, &session.player).await?;
        self.store
            .save_missions(&session.id, &session.missions)
            .await?;
        self.store
            .save_transcript(&session.id, &session.transcript)
            .await?;
        Ok(())
    }

    fn build_request(&self, session: &Session, input: &str) -> Request {
        let mut system = String::from(BASE_PROMPT);

        if let Some(ref custom) = session.manifest.style.custom_prompt {
            system.push_str("\n## Style\n");
            system.push_str(custom);
        } else if !session.manifest.style.style.is_empty() {
            system.push_str(&format!(
                "\n## Style\nNarrate in a {} register.\n",
                session.manifest.style.style
            ));
        }

        system.push_str("\n## World\n");
        system.push_str(&session.manifest.world.prompt_summary());

        let mut messages = session.conversation_window();
        messages.push(Message::player(input));

        let mut request = Request::new(messages)
            .with_system(system)
            .with_max_tokens(self.config.max_tokens);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(ref model) = session.manifest.style.model {
            request = request.with_model(model);
        }
        request
    }
}
