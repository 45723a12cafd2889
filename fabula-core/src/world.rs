//! The structured world bundle supplied by collaborators at session
//! creation: NPC roster, scene graph with unlock edges, item catalog.
//!
//! The runtime treats this data as read-only reference material for prompt
//! building; it is persisted with the session manifest so recovery does not
//! depend on the upstream document pipeline.

use serde::{Deserialize, Serialize};

/// Everything the narrator needs to know about the story world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldBundle {
    pub npcs: Vec<Npc>,
    pub scenes: Vec<Scene>,
    pub items: Vec<ItemDef>,
}

/// A character the narrator may voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Npc {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A scene in the story graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Scene ids this scene can unlock.
    #[serde(default)]
    pub unlocks: Vec<String>,
    /// Whether the scene is open from the start.
    #[serde(default)]
    pub initially_unlocked: bool,
}

/// An item the story can grant or require.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl WorldBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn npc(&self, id: &str) -> Option<&Npc> {
        self.npcs.iter().find(|n| n.id == id)
    }

    pub fn scene(&self, id: &str) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == id)
    }

    pub fn item(&self, id: &str) -> Option<&ItemDef> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Scene ids open at session start.
    pub fn initial_scenes(&self) -> impl Iterator<Item = &str> {
        self.scenes
            .iter()
            .filter(|s| s.initially_unlocked)
            .map(|s| s.id.as_str())
    }

    /// Compact prose summary for the narrator's system prompt.
    pub fn prompt_summary(&self) -> String {
        let mut out = String::new();
        if !self.npcs.is_empty() {
            out.push_str("## Characters\n");
            for npc in &self.npcs {
                out.push_str(&format!("- {} ({})", npc.name, npc.id));
                if !npc.description.is_empty() {
                    out.push_str(&format!(": {}", npc.description));
                }
                out.push('\n');
            }
        }
        if !self.scenes.is_empty() {
            out.push_str("## Scenes\n");
            for scene in &self.scenes {
                out.push_str(&format!("- {} ({})", scene.name, scene.id));
                if !scene.unlocks.is_empty() {
                    out.push_str(&format!(" -> unlocks {}", scene.unlocks.join(", ")));
                }
                out.push('\n');
            }
        }
        if !self.items.is_empty() {
            out.push_str("## Items\n");
            for item in &self.items {
                out.push_str(&format!("- {} ({})\n", item.name, item.id));
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) fn sample_world() -> WorldBundle {
    WorldBundle {
        npcs: vec![Npc {
            id: "npc_1".to_string(),
            name: "Mira".to_string(),
            description: "A nervous herbalist".to_string(),
        }],
        scenes: vec![
            Scene {
                id: "village".to_string(),
                name: "The Village".to_string(),
                description: String::new(),
                unlocks: vec!["crypt".to_string()],
                initially_unlocked: true,
            },
            Scene {
                id: "crypt".to_string(),
                name: "The Crypt".to_string(),
                description: String::new(),
                unlocks: Vec::new(),
                initially_unlocked: false,
            },
        ],
        items: vec![ItemDef {
            id: "old_key".to_string(),
            name: "Old Key".to_string(),
            description: String::new(),
        }],
    }
}
