//! Requirement evaluation for mission completion paths.
//!
//! A completion path names per-category requirements; [`evaluate`] checks
//! them against a player-state snapshot without mutating either. Absent
//! categories are vacuously satisfied; a requirement referencing a
//! player-state key that does not exist reads as zero / not-visited, which
//! makes it unmet rather than an error.

use crate::player::PlayerState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The requirements of one completion path. Every present category must be
/// fully satisfied (AND); categories left `None` do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathRequirements {
    /// Item id to minimum quantity held.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<HashMap<String, u32>>,

    /// NPC id to minimum relationship score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships: Option<HashMap<String, i64>>,

    /// Locations the player must have visited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<String>>,

    /// Stat name to minimum value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<HashMap<String, i64>>,
}

impl PathRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, item_id: impl Into<String>, quantity: u32) -> Self {
        self.items
            .get_or_insert_with(HashMap::new)
            .insert(item_id.into(), quantity);
        self
    }

    pub fn with_relationship(mut self, npc_id: impl Into<String>, minimum: i64) -> Self {
        self.relationships
            .get_or_insert_with(HashMap::new)
            .insert(npc_id.into(), minimum);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.locations
            .get_or_insert_with(Vec::new)
            .push(location.into());
        self
    }

    pub fn with_stat(mut self, name: impl Into<String>, minimum: i64) -> Self {
        self.stats
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), minimum);
        self
    }
}

/// Result of evaluating one path against a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementReport {
    pub met: bool,
    pub missing: Vec<MissingRequirement>,
}

/// One unsatisfied requirement, with what the player actually has.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum MissingRequirement {
    Item {
        item_id: String,
        needed: u32,
        have: u32,
    },
    Relationship {
        npc_id: String,
        needed: i64,
        have: i64,
    },
    Location {
        location: String,
    },
    Stat {
        name: String,
        needed: i64,
        have: i64,
    },
}

impl fmt::Display for MissingRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item {
                item_id,
                needed,
                have,
            } => write!(f, "item {item_id} x{needed} (have {have})"),
            Self::Relationship {
                npc_id,
                needed,
                have,
            } => write!(f, "relationship with {npc_id} >= {needed} (have {have})"),
            Self::Location { location } => write!(f, "visit {location}"),
            Self::Stat { name, needed, have } => {
                write!(f, "stat {name} >= {needed} (have {have})")
            }
        }
    }
}

/// Evaluate a path's requirements against a player snapshot.
///
/// Pure: reads both inputs, mutates neither.
pub fn evaluate(requirements: &PathRequirements, player: &PlayerState) -> RequirementReport {
    let mut missing = Vec::new();

    if let Some(items) = &requirements.items {
        // Sorted for a stable missing-report order.
        let mut entries: Vec<_> = items.iter().collect();
        entries.sort_by_key(|(id, _)| id.as_str());
        for (item_id, &needed) in entries {
            let have = player.item_count(item_id);
            if have < needed {
                missing.push(MissingRequirement::Item {
                    item_id: item_id.clone(),
                    needed,
                    have,
                });
            }
        }
    }

    if let Some(relationships) = &requirements.relationships {
        let mut entries: Vec<_> = relationships.iter().collect();
        entries.sort_by_key(|(id, _)| id.as_str());
        for (npc_id, &needed) in entries {
            let have = player.relationship(npc_id);
            if have < needed {
                missing.push(MissingRequirement::Relationship {
                    npc_id: npc_id.clone(),
                    needed,
                    have,
                });
            }
        }
    }

    if let Some(locations) = &requirements.locations {
        for location in locations {
            if !player.has_visited(location) {
                missing.push(MissingRequirement::Location {
                    location: location.clone(),
                });
            }
        }
    }

    if let Some(stats) = &requirements.stats {
        let mut entries: Vec<_> = stats.iter().collect();
        entries.sort_by_key(|(name, _)| name.as_str());
        for (name, &needed) in entries {
            let have = player.stat(name);
            if have < needed {
                missing.push(MissingRequirement::Stat {
                    name: name.clone(),
                    needed,
                    have,
                });
            }
        }
    }

    RequirementReport {
        met: missing.is_empty(),
        missing,
    }
}
