use async_trait::async_trait;

use scorebook_model::{Game, GameId, TeamRecord};
use uuid::Uuid;

use crate::error::StorageError;
use crate::record::{GameRecord, StoreVersion};

/// The storage trait for scorebook games and team rosters.
///
/// ## OCC Conflict Detection
///
/// `save_game` is conditional on the stored version equalling
/// `expected_version`. On mismatch it returns
/// `Err(StorageError::ConcurrentConflict { .. })` and writes nothing. Every
/// successful save bumps the version by one and returns it.
///
/// ## Single Writer
///
/// A store may be shared, but the log of one game has one logical writer at
/// a time: the client session that owns it, or the cluster node applying
/// committed entries. OCC catches the cases where that assumption breaks.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be used in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait GameStore: Send + Sync + 'static {
    // ── Games ────────────────────────────────────────────────────────────────

    /// Store a new game at version 0.
    ///
    /// Returns `Err(StorageError::AlreadyExists)` if the id is taken.
    async fn create_game(&self, game: Game, confirmed: usize)
        -> Result<GameRecord, StorageError>;

    /// Returns `Err(StorageError::GameNotFound)` if the game does not exist.
    async fn load_game(&self, id: &GameId) -> Result<GameRecord, StorageError>;

    /// Version-validated replace of a stored game. Returns the new version.
    async fn save_game(
        &self,
        game: &Game,
        confirmed: usize,
        expected_version: StoreVersion,
    ) -> Result<StoreVersion, StorageError>;

    /// Unconditional create-or-replace, used when installing state that is
    /// already authoritative (a cluster snapshot, a restored backup).
    async fn put_game(&self, game: Game, confirmed: usize) -> Result<GameRecord, StorageError>;

    /// Returns `Err(StorageError::GameNotFound)` if the game does not exist.
    async fn delete_game(&self, id: &GameId) -> Result<(), StorageError>;

    /// Every stored game, ordered by id.
    async fn list_games(&self) -> Result<Vec<GameRecord>, StorageError>;

    // ── Teams ────────────────────────────────────────────────────────────────

    /// Create or replace a team record.
    async fn save_team(&self, team: TeamRecord) -> Result<(), StorageError>;

    async fn load_team(&self, id: &Uuid) -> Result<TeamRecord, StorageError>;

    /// Every stored team, ordered by id.
    async fn list_teams(&self) -> Result<Vec<TeamRecord>, StorageError>;
}
