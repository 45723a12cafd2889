//! Narrative session runtime for AI interactive fiction.
//!
//! This crate provides:
//! - Incremental classification of marker-structured narrator output
//! - A streaming step emitter with a no-retraction guarantee
//! - Missions with multi-path completion and a storyline gate
//! - Durable per-session artifacts and crash recovery
//!
//! # Quick Start
//!
//! ```ignore
//! use fabula_core::{EngineConfig, EventSink, NarrativeEngine, StyleConfig, WorldBundle};
//! use fabula_model::ModelClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ModelClient::from_env()?;
//!     let engine = NarrativeEngine::new(client, EngineConfig::new("./sessions"));
//!
//!     engine
//!         .create_session("s1", WorldBundle::new(), StyleConfig::default(), None)
//!         .await?;
//!
//!     let (sink, mut events) = EventSink::channel();
//!     let outcome = engine.player_action("s1", "I open the door", &sink).await?;
//!     println!("{}", outcome.text);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod emitter;
pub mod events;
pub mod mission;
pub mod player;
pub mod recovery;
pub mod requirements;
pub mod session;
pub mod steps;
pub mod store;
pub mod testing;
pub mod world;

// Primary public API
pub use emitter::StepEmitter;
pub use events::{EventSink, TurnEvent};
pub use mission::{
    CompletionPath, Mission, MissionDef, MissionError, MissionReward, MissionStatus, MissionStore,
    MissionType, SubmissionOutcome,
};
pub use player::PlayerState;
pub use requirements::{MissingRequirement, PathRequirements, RequirementReport};
pub use session::{EngineConfig, EngineError, NarrativeEngine, Session, TurnOutcome};
pub use steps::{ClassifyError, HintDelta, NarrativeStep};
pub use store::{SessionManifest, SessionStore, StoreError, StyleConfig, TranscriptEntry};
pub use world::{ItemDef, Npc, Scene, WorldBundle};
