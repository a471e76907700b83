use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use scorebook_model::{Game, GameId, TeamRecord};
use uuid::Uuid;

use crate::error::StorageError;
use crate::record::{GameRecord, StoreVersion};
use crate::traits::GameStore;

/// In-memory store. Cloning a record out on every read keeps callers from
/// holding the lock across await points.
#[derive(Debug, Default)]
pub struct MemoryStore {
    games: RwLock<BTreeMap<GameId, GameRecord>>,
    teams: RwLock<BTreeMap<Uuid, TeamRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn create_game(
        &self,
        game: Game,
        confirmed: usize,
    ) -> Result<GameRecord, StorageError> {
        let mut games = self.games.write().await;
        if games.contains_key(&game.id) {
            return Err(StorageError::AlreadyExists { game_id: game.id });
        }
        let record = GameRecord::new(game, confirmed);
        games.insert(record.game.id, record.clone());
        Ok(record)
    }

    async fn load_game(&self, id: &GameId) -> Result<GameRecord, StorageError> {
        self.games
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StorageError::GameNotFound { game_id: *id })
    }

    async fn save_game(
        &self,
        game: &Game,
        confirmed: usize,
        expected_version: StoreVersion,
    ) -> Result<StoreVersion, StorageError> {
        let mut games = self.games.write().await;
        let record = games
            .get_mut(&game.id)
            .ok_or(StorageError::GameNotFound { game_id: game.id })?;
        if record.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                game_id: game.id,
                expected_version,
                actual_version: record.version,
            });
        }
        record.game = game.clone();
        record.confirmed = confirmed;
        record.version += 1;
        record.updated_at = scorebook_model::now_rfc3339();
        Ok(record.version)
    }

    async fn put_game(&self, game: Game, confirmed: usize) -> Result<GameRecord, StorageError> {
        let mut games = self.games.write().await;
        let version = games.get(&game.id).map(|r| r.version + 1).unwrap_or(0);
        let mut record = GameRecord::new(game, confirmed);
        record.version = version;
        games.insert(record.game.id, record.clone());
        Ok(record)
    }

    async fn delete_game(&self, id: &GameId) -> Result<(), StorageError> {
        self.games
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(StorageError::GameNotFound { game_id: *id })
    }

    async fn list_games(&self) -> Result<Vec<GameRecord>, StorageError> {
        Ok(self.games.read().await.values().cloned().collect())
    }

    async fn save_team(&self, team: TeamRecord) -> Result<(), StorageError> {
        self.teams.write().await.insert(team.id, team);
        Ok(())
    }

    async fn load_team(&self, id: &Uuid) -> Result<TeamRecord, StorageError> {
        self.teams
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StorageError::TeamNotFound { team_id: *id })
    }

    async fn list_teams(&self) -> Result<Vec<TeamRecord>, StorageError> {
        Ok(self.teams.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::run_conformance_suite;

    #[tokio::test]
    async fn memory_store_conformance() {
        let report = run_conformance_suite(|| async { MemoryStore::new() }).await;
        assert!(report.failed == 0, "{report}");
    }
}
