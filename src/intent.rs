//! Pending intents: the one user action that survives a login redirect.
//!
//! When the [`AuthGateway`](crate::gateway::AuthGateway) sends the user to the
//! login surface it first records what the user was trying to do. On the next
//! start the client consumes that record exactly once and replays it.
//!
//! Storage is pluggable through [`IntentStorage`], a string key/value store
//! with the same shape as browser `localStorage`. [`MemoryStorage`] keeps
//! entries for the lifetime of the process, [`FileStorage`] persists them in
//! a directory so they survive a restart.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::{GameType, PlayerColor};

/// Storage key used for the pending intent record.
pub const PENDING_INTENT_KEY: &str = "reversi.pendingAction";

/// A user action to replay after authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PendingIntent {
    /// Open the matchmaking dialog.
    #[serde(rename = "MATCHMAKING_SHOW_DIALOG")]
    ShowMatchmakingDialog,
    /// Create a new session of the given type.
    #[serde(rename = "SESSION_CREATE", rename_all = "camelCase")]
    CreateSession { game_type: GameType },
    /// Join an existing session.
    #[serde(rename = "SESSION_JOIN", rename_all = "camelCase")]
    JoinSession { session_id: String },
    /// Enter the matchmaking queue.
    #[serde(rename = "MATCHMAKING_ENQUEUE", rename_all = "camelCase")]
    EnqueueMatchmaking { preferred_color: Option<PlayerColor> },
}

// ── Storage ─────────────────────────────────────────────────────────

/// A synchronous string key/value store.
pub trait IntentStorage: Send + Sync + 'static {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be written.
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IntentStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Directory-backed storage: one file per key.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl IntentStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Holds at most one [`PendingIntent`] under a fixed key.
#[derive(Clone)]
pub struct PendingIntentStore {
    storage: Arc<dyn IntentStorage>,
    key: String,
}

impl PendingIntentStore {
    /// A store using [`PENDING_INTENT_KEY`].
    pub fn new(storage: Arc<dyn IntentStorage>) -> Self {
        Self::with_key(storage, PENDING_INTENT_KEY)
    }

    pub fn with_key(storage: Arc<dyn IntentStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    /// Persist `intent`, replacing whatever was pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the intent cannot be encoded or written.
    pub fn save(&self, intent: &PendingIntent) -> Result<()> {
        let json = serde_json::to_string(intent)?;
        self.storage.set(&self.key, &json)?;
        debug!(key = %self.key, ?intent, "pending intent saved");
        Ok(())
    }

    /// Read and delete the pending intent.
    ///
    /// The record is deleted before it is decoded, and nothing is returned
    /// if the delete fails, so a record can never be handed out twice.
    pub fn consume(&self) -> Option<PendingIntent> {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %self.key, "failed to read pending intent: {e}");
                return None;
            }
        };
        if let Err(e) = self.storage.remove(&self.key) {
            warn!(key = %self.key, "failed to clear pending intent, not replaying: {e}");
            return None;
        }
        match serde_json::from_str::<PendingIntent>(&raw) {
            Ok(intent) => Some(intent),
            Err(e) => {
                warn!(key = %self.key, "discarding unreadable pending intent: {e}; raw: {raw}");
                None
            }
        }
    }

    /// Whether a record is currently stored.
    pub fn is_pending(&self) -> bool {
        matches!(self.storage.get(&self.key), Ok(Some(_)))
    }
}

impl std::fmt::Debug for PendingIntentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingIntentStore")
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::error::ReversiError;

    fn memory_store() -> (PendingIntentStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (PendingIntentStore::new(storage.clone()), storage)
    }

    #[test]
    fn intent_json_matches_stored_format() {
        let json = serde_json::to_value(PendingIntent::CreateSession {
            game_type: GameType::PlayerVsPlayer,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "SESSION_CREATE", "payload": {"gameType": "PLAYER_VS_PLAYER"}})
        );

        let json = serde_json::to_value(PendingIntent::ShowMatchmakingDialog).unwrap();
        assert_eq!(json, serde_json::json!({"type": "MATCHMAKING_SHOW_DIALOG"}));

        let parsed: PendingIntent =
            serde_json::from_str(r#"{"type":"SESSION_JOIN","payload":{"sessionId":"abc"}}"#)
                .unwrap();
        assert_eq!(
            parsed,
            PendingIntent::JoinSession {
                session_id: "abc".into()
            }
        );
    }

    #[test]
    fn consume_is_read_once() {
        let (store, _) = memory_store();
        store.save(&PendingIntent::ShowMatchmakingDialog).unwrap();
        assert!(store.is_pending());
        assert_eq!(store.consume(), Some(PendingIntent::ShowMatchmakingDialog));
        assert_eq!(store.consume(), None);
        assert!(!store.is_pending());
    }

    #[test]
    fn save_replaces_previous_intent() {
        let (store, _) = memory_store();
        store.save(&PendingIntent::ShowMatchmakingDialog).unwrap();
        store
            .save(&PendingIntent::JoinSession {
                session_id: "s-9".into(),
            })
            .unwrap();
        assert_eq!(
            store.consume(),
            Some(PendingIntent::JoinSession {
                session_id: "s-9".into()
            })
        );
    }

    #[test]
    fn unreadable_record_is_discarded() {
        let (store, storage) = memory_store();
        storage.set(PENDING_INTENT_KEY, "{not json").unwrap();
        assert_eq!(store.consume(), None);
        assert_eq!(storage.get(PENDING_INTENT_KEY).unwrap(), None);
    }

    #[test]
    fn unknown_intent_type_is_discarded() {
        let (store, storage) = memory_store();
        storage
            .set(PENDING_INTENT_KEY, r#"{"type":"LEADERBOARD_OPEN"}"#)
            .unwrap();
        assert_eq!(store.consume(), None);
    }

    struct StuckStorage;

    impl IntentStorage for StuckStorage {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(Some(r#"{"type":"MATCHMAKING_SHOW_DIALOG"}"#.into()))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Ok(())
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Err(ReversiError::Io(std::io::Error::other("read-only")))
        }
    }

    #[test]
    fn failed_delete_suppresses_replay() {
        let store = PendingIntentStore::new(Arc::new(StuckStorage));
        assert_eq!(store.consume(), None);
    }

    #[test]
    fn file_storage_survives_new_instance() {
        let dir = std::env::temp_dir().join(format!("reversi-intent-{}", std::process::id()));
        let first = PendingIntentStore::new(Arc::new(FileStorage::new(&dir)));
        first
            .save(&PendingIntent::EnqueueMatchmaking {
                preferred_color: Some(PlayerColor::Black),
            })
            .unwrap();

        let second = PendingIntentStore::new(Arc::new(FileStorage::new(&dir)));
        assert_eq!(
            second.consume(),
            Some(PendingIntent::EnqueueMatchmaking {
                preferred_color: Some(PlayerColor::Black)
            })
        );
        assert_eq!(second.consume(), None);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
