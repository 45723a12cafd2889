//! Player state: the per-session snapshot of stats, inventory,
//! relationships, locations, and currency.
//!
//! The requirement evaluator reads this snapshot; hint deltas and mission
//! rewards write to it through the helpers here.

use crate::mission::MissionReward;
use crate::steps::HintDelta;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The player's mutable state within a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Named numeric stats (courage, wit, ...).
    pub stats: HashMap<String, i64>,

    /// Item id to quantity held.
    pub inventory: HashMap<String, u32>,

    /// NPC id to relationship score.
    pub relationships: HashMap<String, i64>,

    /// Scenes opened up by the story.
    pub unlocked_scenes: HashSet<String>,

    /// Locations the player has actually been to.
    pub visited_locations: HashSet<String>,

    /// Spendable currency.
    pub currency: i64,
}

impl PlayerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a stat, treating absence as zero.
    pub fn stat(&self, name: &str) -> i64 {
        self.stats.get(name).copied().unwrap_or(0)
    }

    /// Quantity of an item held, zero when absent.
    pub fn item_count(&self, item_id: &str) -> u32 {
        self.inventory.get(item_id).copied().unwrap_or(0)
    }

    /// Relationship score with an NPC, zero when unmet.
    pub fn relationship(&self, npc_id: &str) -> i64 {
        self.relationships.get(npc_id).copied().unwrap_or(0)
    }

    /// Whether the player has visited a location.
    pub fn has_visited(&self, location: &str) -> bool {
        self.visited_locations.contains(location)
    }

    /// Record a visit to a location.
    pub fn visit(&mut self, location: impl Into<String>) {
        self.visited_locations.insert(location.into());
    }

    /// Apply one typed hint delta from the narrative stream.
    pub fn apply_delta(&mut self, delta: &HintDelta) {
        match delta {
            HintDelta::Stat { name, delta } => {
                *self.stats.entry(name.clone()).or_insert(0) += delta;
            }
            HintDelta::Relationship { npc_id, delta } => {
                *self.relationships.entry(npc_id.clone()).or_insert(0) += delta;
            }
            HintDelta::Item { item_id, delta } => {
                let count = self.inventory.entry(item_id.clone()).or_insert(0);
                // Inventory never goes negative; a larger deduction clamps.
                let d = (*delta).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
                *count = count.saturating_add_signed(d);
                if *count == 0 {
                    self.inventory.remove(item_id);
                }
            }
            HintDelta::UnlockScene { scene_id } => {
                self.unlocked_scenes.insert(scene_id.clone());
            }
        }
    }

    /// Apply a mission reward in full.
    pub fn apply_reward(&mut self, reward: &MissionReward) {
        self.currency += reward.currency;
        for (item_id, qty) in &reward.items {
            *self.inventory.entry(item_id.clone()).or_insert(0) += qty;
        }
        for (stat, bonus) in &reward.stat_bonuses {
            *self.stats.entry(stat.clone()).or_insert(0) += bonus;
        }
    }
}
