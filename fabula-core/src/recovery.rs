//! Session recovery from disk artifacts.
//!
//! Recovery is the only path from cold storage back into the cache. The
//! manifest and player status are load-bearing and fail closed; the
//! mission record and transcript degrade to empty when their files are
//! missing, so a session from before those artifacts existed still
//! loads.

use crate::mission::MissionStore;
use crate::session::Session;
use crate::store::{Artifact, SessionStore, StoreError, TranscriptEntry};
use tracing::{info, warn};

/// Rebuild a [`Session`] from its on-disk artifacts.
///
/// An unknown session id is `StoreError::NotFound` for the manifest; no
/// session is fabricated from thin air.
pub async fn recover(store: &SessionStore, session_id: &str) -> Result<Session, StoreError> {
    if !store.exists(session_id).await {
        return Err(StoreError::NotFound {
            session_id: session_id.to_string(),
            artifact: Artifact::Manifest,
        });
    }

    let manifest = store.load_manifest(session_id).await?;
    let player = store.load_status(session_id).await?;

    let missions = match store.load_missions(session_id).await {
        Ok(missions) => missions,
        Err(StoreError::NotFound { .. }) => {
            warn!(session_id, "no mission artifact, starting empty");
            MissionStore::new()
        }
        Err(e) => return Err(e),
    };

    let transcript: Vec<TranscriptEntry> = match store.load_transcript(session_id).await {
        Ok(entries) => entries,
        Err(StoreError::NotFound { .. }) => {
            warn!(session_id, "no transcript artifact, starting empty");
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    info!(
        session_id,
        turns = transcript.len(),
        missions = missions.missions.len(),
        "session recovered"
    );
    Ok(Session::from_parts(manifest, player, missions, transcript))
}
