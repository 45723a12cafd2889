//! Durable per-session artifacts.
//!
//! Each session owns a directory under the store root holding four JSON
//! files: a manifest (style/config, optional source-template pointer, the
//! world bundle), the player status, the mission record, and the
//! transcript. Every file carries a format version checked on load.
//!
//! Access follows single-writer discipline per session: the engine holds
//! the session lock across every read-modify-write here.

use crate::mission::MissionStore;
use crate::player::PlayerState;
use crate::world::WorldBundle;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Current artifact format version.
const STORE_VERSION: u32 = 1;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session {session_id}: {artifact} not found")]
    NotFound {
        session_id: String,
        artifact: Artifact,
    },

    #[error("Invalid session id: {0:?}")]
    InvalidId(String),

    #[error("Version mismatch in {artifact}: expected {expected}, found {found}")]
    VersionMismatch {
        artifact: Artifact,
        expected: u32,
        found: u32,
    },
}

/// The four per-session artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Manifest,
    Status,
    Missions,
    Transcript,
}

impl Artifact {
    fn file_name(self) -> &'static str {
        match self {
            Artifact::Manifest => "manifest.json",
            Artifact::Status => "status.json",
            Artifact::Missions => "missions.json",
            Artifact::Transcript => "transcript.json",
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Narration style and model settings for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleConfig {
    /// Named narration style ("default", "noir", ...).
    #[serde(default)]
    pub style: String,

    /// Extra system-prompt text appended for this session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,

    /// Model override for this session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Per-session manifest: identity, style, and the world bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub style: StyleConfig,

    /// Pointer to the shared source template (uploaded document) this
    /// session was spawned from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_template: Option<String>,

    pub world: WorldBundle,
}

/// One player/model turn pair in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub player: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(player: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            player: player.into(),
            model: model.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Versioned on-disk envelope shared by all artifacts.
#[derive(Debug, Serialize, Deserialize)]
struct ArtifactFile<T> {
    version: u32,
    saved_at: DateTime<Utc>,
    data: T,
}

/// Filesystem-backed store of session artifacts.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one session's artifacts.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        let sanitized: String = session_id
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(sanitized)
    }

    /// The session directory, with the id rejected when empty. An empty id
    /// would resolve to the store root and scatter artifacts there.
    fn checked_session_dir(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        if session_id.is_empty() {
            return Err(StoreError::InvalidId(session_id.to_string()));
        }
        Ok(self.session_dir(session_id))
    }

    /// Whether a session directory exists on disk.
    pub async fn exists(&self, session_id: &str) -> bool {
        let Ok(dir) = self.checked_session_dir(session_id) else {
            return false;
        };
        fs::try_exists(dir).await.unwrap_or(false)
    }

    /// Create a session's directory and write all four artifacts.
    pub async fn create_session(
        &self,
        manifest: &SessionManifest,
        player: &PlayerState,
        missions: &MissionStore,
    ) -> Result<(), StoreError> {
        let dir = self.checked_session_dir(&manifest.session_id)?;
        fs::create_dir_all(&dir).await?;

        self.save_manifest(manifest).await?;
        self.save_status(&manifest.session_id, player).await?;
        self.save_missions(&manifest.session_id, missions).await?;
        self.save_transcript(&manifest.session_id, &[]).await?;
        Ok(())
    }

    /// Remove a session and all its artifacts.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let dir = self.checked_session_dir(session_id)?;
        if fs::try_exists(&dir).await.unwrap_or(false) {
            fs::remove_dir_all(dir).await?;
        }
        Ok(())
    }

    /// List session ids present on disk.
    pub async fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        let mut sessions = Vec::new();
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(sessions);
        }
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                sessions.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    pub async fn save_manifest(&self, manifest: &SessionManifest) -> Result<(), StoreError> {
        self.write_artifact(&manifest.session_id, Artifact::Manifest, manifest)
            .await
    }

    pub async fn load_manifest(&self, session_id: &str) -> Result<SessionManifest, StoreError> {
        self.read_artifact(session_id, Artifact::Manifest).await
    }

    pub async fn save_status(
        &self,
        session_id: &str,
        player: &PlayerState,
    ) -> Result<(), StoreError> {
        self.write_artifact(session_id, Artifact::Status, player)
            .await
    }

    pub async fn load_status(&self, session_id: &str) -> Result<PlayerState, StoreError> {
        self.read_artifact(session_id, Artifact::Status).await
    }

    pub async fn save_missions(
        &self,
        session_id: &str,
        missions: &MissionStore,
    ) -> Result<(), StoreError> {
        self.write_artifact(session_id, Artifact::Missions, missions)
            .await
    }

    pub async fn load_missions(&self, session_id: &str) -> Result<MissionStore, StoreError> {
        self.read_artifact(session_id, Artifact::Missions).await
    }

    pub async fn save_transcript(
        &self,
        session_id: &str,
        entries: &[TranscriptEntry],
    ) -> Result<(), StoreError> {
        self.write_artifact(session_id, Artifact::Transcript, &entries.to_vec())
            .await
    }

    pub async fn load_transcript(
        &self,
        session_id: &str,
    ) -> Result<Vec<TranscriptEntry>, StoreError> {
        self.read_artifact(session_id, Artifact::Transcript).await
    }

    /// Append one turn pair to the transcript (read-modify-write under the
    /// session's single-writer lock).
    pub async fn append_transcript(
        &self,
        session_id: &str,
        entry: TranscriptEntry,
    ) -> Result<(), StoreError> {
        let mut entries = match self.load_transcript(session_id).await {
            Ok(entries) => entries,
            Err(StoreError::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };
        entries.push(entry);
        self.save_transcript(session_id, &entries).await
    }

    async fn write_artifact<T: Serialize>(
        &self,
        session_id: &str,
        artifact: Artifact,
        data: &T,
    ) -> Result<(), StoreError> {
        let file = ArtifactFile {
            version: STORE_VERSION,
            saved_at: Utc::now(),
            data,
        };
        let content = serde_json::to_string_pretty(&file)?;
        let path = self.checked_session_dir(session_id)?.join(artifact.file_name());
        fs::write(path, content).await?;
        Ok(())
    }

    async fn read_artifact<T: DeserializeOwned>(
        &self,
        session_id: &str,
        artifact: Artifact,
    ) -> Result<T, StoreError> {
        let path = self.checked_session_dir(session_id)?.join(artifact.file_name());
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    session_id: session_id.to_string(),
                    artifact,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let file: ArtifactFile<T> = serde_json::from_str(&content)?;
        if file.version != STORE_VERSION {
            return Err(StoreError::VersionMismatch {
                artifact,
                expected: STORE_VERSION,
                found: file.version,
            });
        }
        Ok(file.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::{CompletionPath, MissionDef, MissionType};
    use crate::requirements::PathRequirements;
    use tempfile::TempDir;

    fn manifest(session_id: &str) -> SessionManifest {
        SessionManifest {
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            style: StyleConfig {
                style: "default".to_string(),
                custom_prompt: None,
                model: None,
            },
            source_template: Some("file_42".to_string()),
            world: WorldBundle::new(),
        }
    }

    #[tokio::test]
    async fn test_create_and_reload_session() {
        let dir = TempDir::new().expect("temp dir");
        let store = SessionStore::new(dir.path());

        let mut player = PlayerState::new();
        player.currency = 10;
        let mut missions = MissionStore::new();
        missions.advance_turn();

        store
            .create_session(&manifest("s1"), &player, &missions)
            .await
            .expect("create");

        assert!(store.exists("s1").await);
        assert_eq!(store.load_status("s1").await.unwrap(), player);
        assert_eq!(store.load_missions("s1").await.unwrap(), missions);
        assert_eq!(
            store.load_manifest("s1").await.unwrap().source_template,
            Some("file_42".to_string())
        );
        assert!(store.load_transcript("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_found() {
        let dir = TempDir::new().expect("temp dir");
        let store = SessionStore::new(dir.path());

        let err = store.load_status("ghost").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotFound {
                artifact: Artifact::Status,
                ..
            }
        ));
        assert!(!store.exists("ghost").await);
    }

    #[tokio::test]
    async fn test_append_transcript_preserves_order() {
        let dir = TempDir::new().expect("temp dir");
        let store = SessionStore::new(dir.path());
        store
            .create_session(&manifest("s1"), &PlayerState::new(), &MissionStore::new())
            .await
            .expect("create");

        for i in 0..3 {
            store
                .append_transcript("s1", TranscriptEntry::new(format!("in {i}"), format!("out {i}")))
                .await
                .expect("append");
        }

        let entries = store.load_transcript("s1").await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].player, "in 0");
        assert_eq!(entries[2].model, "out 2");
    }

    #[tokio::test]
    async fn test_missions_survive_round_trip() {
        let dir = TempDir::new().expect("temp dir");
        let store = SessionStore::new(dir.path());
        store
            .create_session(&manifest("s1"), &PlayerState::new(), &MissionStore::new())
            .await
            .expect("create");

        let mut missions = MissionStore::new();
        missions.advance_turn();
        missions
            .create(
                MissionDef::new("Gather herbs", "Five sprigs", MissionType::Item).with_path(
                    CompletionPath::new(
                        "only",
                        "Gather",
                        PathRequirements::new().with_item("herb", 5),
                    ),
                ),
            )
            .expect("create mission");

        store.save_missions("s1", &missions).await.expect("save");
        assert_eq!(store.load_missions("s1").await.unwrap(), missions);
    }

    #[tokio::test]
    async fn test_version_mismatch_is_explicit() {
        let dir = TempDir::new().expect("temp dir");
        let store = SessionStore::new(dir.path());
        store
            .create_session(&manifest("s1"), &PlayerState::new(), &MissionStore::new())
            .await
            .expect("create");

        let path = store.session_dir("s1").join("status.json");
        let content = std::fs::read_to_string(&path).expect("read");
        std::fs::write(&path, content.replacen("\"version\": 1", "\"version\": 99", 1))
            .expect("write");

        let err = store.load_status("s1").await.unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { found: 99, .. }));
    }

    #[tokio::test]
    async fn test_list_and_delete_sessions() {
        let dir = TempDir::new().expect("temp dir");
        let store = SessionStore::new(dir.path());
        for id in ["alpha", "beta"] {
            store
                .create_session(&manifest(id), &PlayerState::new(), &MissionStore::new())
                .await
                .expect("create");
        }

        assert_eq!(store.list_sessions().await.unwrap(), vec!["alpha", "beta"]);

        store.delete_session("alpha").await.expect("delete");
        assert_eq!(store.list_sessions().await.unwrap(), vec!["beta"]);
    }

    #[test]
    fn test_session_dir_sanitizes_id() {
        let store = SessionStore::new("/tmp/fabula");
        let dir = store.session_dir("../evil/../id");
        assert!(!dir.to_string_lossy().contains(".."));
    }

    #[tokio::test]
    async fn test_empty_session_id_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let store = SessionStore::new(dir.path());

        // An empty id must never resolve to the store root.
        let err = store
            .create_session(&manifest(""), &PlayerState::new(), &MissionStore::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidId(_)));
        assert!(matches!(
            store.load_status("").await.unwrap_err(),
            StoreError::InvalidId(_)
        ));

        // Even with other sessions on disk, "" does not exist.
        store
            .create_session(&manifest("real"), &PlayerState::new(), &MissionStore::new())
            .await
            .expect("create");
        assert!(!store.exists("").await);
        assert!(!dir.path().join("manifest.json").exists());
    }
}
