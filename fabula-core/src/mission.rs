//! Missions: quest-like objectives with alternative completion paths and
//! storyline-blocking semantics.
//!
//! Each mission is a small state machine: `Active` resolves to `Completed`
//! (some path satisfied) or `Abandoned` (explicit), both terminal. A
//! mission with several completion paths is satisfied by ANY one of them;
//! submission checks paths in declaration order and resolves to the first
//! fully-met one. While an active story mission blocks the storyline, the
//! main narrative loop is refused until it resolves.
//!
//! The [`MissionStore`] also owns the per-session turn counter, the single
//! shared clock for the story-mission cooldown and force policies.

use crate::player::PlayerState;
use crate::requirements::{self, MissingRequirement, PathRequirements};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Minimum turns between story-mission creations before a model signal is
/// honored again.
pub const STORY_MISSION_COOLDOWN_TURNS: u64 = 3;

/// Turns without any story mission after which one is requested regardless
/// of the model signaling intent.
pub const STORY_MISSION_FORCE_TURNS: u64 = 10;

/// Errors from mission lifecycle operations.
#[derive(Debug, Error)]
pub enum MissionError {
    #[error("Mission not found: {0}")]
    NotFound(Uuid),

    #[error("Mission {0} is not active")]
    NotActive(Uuid),

    #[error("A storyline-blocking story mission is already active")]
    StoryMissionActive,
}

/// What a mission is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionType {
    Story,
    Location,
    Stat,
    Item,
    Npc,
}

/// Lifecycle state of a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Active,
    Completed,
    Abandoned,
}

/// One alternative, fully specified way to satisfy a mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionPath {
    pub path_id: String,
    pub name: String,
    pub requirements: PathRequirements,
}

impl CompletionPath {
    pub fn new(
        path_id: impl Into<String>,
        name: impl Into<String>,
        requirements: PathRequirements,
    ) -> Self {
        Self {
            path_id: path_id.into(),
            name: name.into(),
            requirements,
        }
    }
}

/// What completing a mission grants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionReward {
    pub currency: i64,

    /// Item id to quantity granted.
    #[serde(default)]
    pub items: HashMap<String, u32>,

    /// Stat name to permanent bonus.
    #[serde(default)]
    pub stat_bonuses: HashMap<String, i64>,
}

impl MissionReward {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn currency(amount: i64) -> Self {
        Self {
            currency: amount,
            ..Self::default()
        }
    }

    pub fn with_item(mut self, item_id: impl Into<String>, quantity: u32) -> Self {
        self.items.insert(item_id.into(), quantity);
        self
    }

    pub fn with_stat_bonus(mut self, name: impl Into<String>, bonus: i64) -> Self {
        self.stat_bonuses.insert(name.into(), bonus);
        self
    }
}

/// Everything needed to create a mission. Content comes from collaborators
/// (ultimately the model); the store stamps id, status, and turn.
#[derive(Debug, Clone)]
pub struct MissionDef {
    pub title: String,
    pub description: String,
    pub mission_type: MissionType,
    pub completion_paths: Vec<CompletionPath>,
    pub reward: MissionReward,
    pub blocks_storyline: bool,
}

impl MissionDef {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        mission_type: MissionType,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            mission_type,
            completion_paths: Vec::new(),
            reward: MissionReward::none(),
            blocks_storyline: false,
        }
    }

    pub fn with_path(mut self, path: CompletionPath) -> Self {
        self.completion_paths.push(path);
        self
    }

    pub fn with_reward(mut self, reward: MissionReward) -> Self {
        self.reward = reward;
        self
    }

    pub fn blocking(mut self) -> Self {
        self.blocks_storyline = true;
        self
    }
}

/// A quest-like objective tracked within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub mission_type: MissionType,
    pub completion_paths: Vec<CompletionPath>,
    pub reward: MissionReward,
    pub status: MissionStatus,
    pub blocks_storyline: bool,
    pub created_turn: u64,
    pub completed_turn: Option<u64>,
    /// `path_id` of the path that completed the mission.
    pub completed_path: Option<String>,
    pub attempted_submissions: u32,
}

impl Mission {
    pub fn is_story_mission(&self) -> bool {
        self.mission_type == MissionType::Story
    }

    pub fn is_active(&self) -> bool {
        self.status == MissionStatus::Active
    }

    /// Whether this mission currently gates the main narrative loop.
    fn blocks_now(&self) -> bool {
        self.is_active() && self.is_story_mission() && self.blocks_storyline
    }
}

/// Outcome of submitting a mission for completion.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// The first fully-met path, in declaration order, completed the
    /// mission. The caller applies the reward to the player state.
    Completed {
        path_id: String,
        reward: MissionReward,
    },
    /// No path was satisfied; per-path missing requirements, in
    /// declaration order.
    Incomplete {
        missing: Vec<(String, Vec<MissingRequirement>)>,
    },
}

/// Per-session mission record: missions, the shared turn clock, and the
/// storyline block flag.
///
/// Invariant: at most one mission is active, a story mission, and
/// storyline-blocking at any time; `has_active_story_mission` mirrors
/// whether one exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionStore {
    pub missions: Vec<Mission>,
    pub turn_count: u64,
    /// Turn the most recent story mission was created on.
    pub last_mission_turn: u64,
    pub has_active_story_mission: bool,
}

impl MissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the shared turn clock by one player action.
    pub fn advance_turn(&mut self) -> u64 {
        self.turn_count += 1;
        self.turn_count
    }

    /// Create a mission from a definition, stamping id and creation turn.
    ///
    /// Refuses a second storyline-blocking story mission while one is
    /// active.
    pub fn create(&mut self, def: MissionDef) -> Result<&Mission, MissionError> {
        let blocks = def.mission_type == MissionType::Story && def.blocks_storyline;
        if blocks && self.has_active_story_mission {
            return Err(MissionError::StoryMissionActive);
        }

        let mission = Mission {
            id: Uuid::new_v4(),
            title: def.title,
            description: def.description,
            mission_type: def.mission_type,
            completion_paths: def.completion_paths,
            reward: def.reward,
            status: MissionStatus::Active,
            blocks_storyline: def.blocks_storyline,
            created_turn: self.turn_count,
            completed_turn: None,
            completed_path: None,
            attempted_submissions: 0,
        };

        debug!(
            mission_id = %mission.id,
            title = %mission.title,
            turn = self.turn_count,
            "mission created"
        );

        if mission.is_story_mission() {
            self.last_mission_turn = self.turn_count;
        }
        if blocks {
            self.has_active_story_mission = true;
        }

        self.missions.push(mission);
        Ok(self.missions.last().expect("just pushed"))
    }

    /// Look up a mission by id.
    pub fn get(&self, id: Uuid) -> Option<&Mission> {
        self.missions.iter().find(|m| m.id == id)
    }

    /// The active storyline-blocking story mission, if any.
    pub fn blocking_mission(&self) -> Option<&Mission> {
        if !self.has_active_story_mission {
            return None;
        }
        self.missions.iter().find(|m| m.blocks_now())
    }

    /// Submit a mission for completion against a player snapshot.
    ///
    /// Paths are evaluated in declaration order; the first fully-met path
    /// wins, even if later paths are also satisfied. Completion is
    /// terminal and clears the storyline block if this mission held it.
    /// The returned reward is NOT applied here.
    pub fn submit(
        &mut self,
        id: Uuid,
        player: &PlayerState,
    ) -> Result<SubmissionOutcome, MissionError> {
        let turn = self.turn_count;
        let mission = self
            .missions
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(MissionError::NotFound(id))?;

        if !mission.is_active() {
            return Err(MissionError::NotActive(id));
        }

        mission.attempted_submissions += 1;

        let mut missing = Vec::new();
        for path in &mission.completion_paths {
            let report = requirements::evaluate(&path.requirements, player);
            if report.met {
                mission.status = MissionStatus::Completed;
                mission.completed_turn = Some(turn);
                mission.completed_path = Some(path.path_id.clone());
                let reward = mission.reward.clone();
                let path_id = path.path_id.clone();
                debug!(mission_id = %id, path = %path_id, "mission completed");
                self.refresh_block_flag();
                return Ok(SubmissionOutcome::Completed { path_id, reward });
            }
            missing.push((path.path_id.clone(), report.missing));
        }

        Ok(SubmissionOutcome::Incomplete { missing })
    }

    /// Abandon an active mission. Terminal; clears the storyline block if
    /// held; grants no reward.
    pub fn abandon(&mut self, id: Uuid) -> Result<(), MissionError> {
        let mission = self
            .missions
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(MissionError::NotFound(id))?;

        if !mission.is_active() {
            return Err(MissionError::NotActive(id));
        }

        mission.status = MissionStatus::Abandoned;
        debug!(mission_id = %id, "mission abandoned");
        self.refresh_block_flag();
        Ok(())
    }

    /// Whether a new story mission should be requested this turn.
    ///
    /// Fires when no story mission is active (blocking or not) AND either
    /// the model signaled intent with the cooldown elapsed, or the force
    /// threshold passed with no story mission at all.
    pub fn should_request_story_mission(&self, marker_present: bool) -> bool {
        let story_active = self
            .missions
            .iter()
            .any(|m| m.is_active() && m.is_story_mission());
        if story_active {
            return false;
        }
        let since = self.turn_count.saturating_sub(self.last_mission_turn);
        if marker_present && since >= STORY_MISSION_COOLDOWN_TURNS {
            return true;
        }
        since >= STORY_MISSION_FORCE_TURNS
    }

    /// Recompute the block flag from mission statuses. Upholds the
    /// at-most-one invariant after any resolution.
    fn refresh_block_flag(&mut self) {
        self.has_active_story_mission = self.missions.iter().any(|m| m.blocks_now());
    }
}
