use scorebook_model::GameId;
use uuid::Uuid;

use crate::record::StoreVersion;

/// All errors that can be returned by a GameStore implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency conflict: the record was written by someone
    /// else since the caller read it.
    #[error(
        "concurrent conflict on game {game_id}: expected version {expected_version}, found {actual_version}"
    )]
    ConcurrentConflict {
        game_id: GameId,
        expected_version: StoreVersion,
        actual_version: StoreVersion,
    },

    #[error("game not found: {game_id}")]
    GameNotFound { game_id: GameId },

    #[error("game already exists: {game_id}")]
    AlreadyExists { game_id: GameId },

    #[error("team not found: {team_id}")]
    TeamNotFound { team_id: Uuid },

    /// A backend-specific storage error (I/O, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Backend(format!("serialization: {}", e))
    }
}
