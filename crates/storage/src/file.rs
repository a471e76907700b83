//! One JSON document per game under a root directory.
//!
//! ```text
//! <root>/games/<game-id>.json
//! <root>/teams/<team-id>.json
//! ```
//!
//! Writes go to a dot-prefixed temp file and are renamed into place, so a
//! crash never leaves a half-written record behind. Read-check-write
//! sequences hold a lock for their own game only; writers of different games
//! never wait on each other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use scorebook_model::{Game, GameId, TeamRecord};
use uuid::Uuid;

use crate::error::StorageError;
use crate::record::{GameRecord, StoreVersion};
use crate::traits::GameStore;

type GameLock = Arc<Mutex<()>>;

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    game_locks: std::sync::Mutex<HashMap<GameId, GameLock>>,
    team_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("games"))?;
        std::fs::create_dir_all(root.join("teams"))?;
        Ok(FileStore {
            root,
            game_locks: std::sync::Mutex::new(HashMap::new()),
            team_lock: Mutex::new(()),
        })
    }

    fn game_lock(&self, id: &GameId) -> GameLock {
        match self.game_locks.lock() {
            Ok(mut locks) => locks.entry(*id).or_default().clone(),
            Err(poisoned) => poisoned.into_inner().entry(*id).or_default().clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn game_path(&self, id: &GameId) -> PathBuf {
        self.root.join("games").join(format!("{id}.json"))
    }

    fn team_path(&self, id: &Uuid) -> PathBuf {
        self.root.join("teams").join(format!("{id}.json"))
    }

    async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<(), StorageError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::Backend(format!("bad path {}", path.display())))?;
        let temp = path.with_file_name(format!(".{file_name}.tmp"));
        fs::write(&temp, bytes).await?;
        fs::rename(&temp, path).await?;
        Ok(())
    }

    async fn read_record(&self, id: &GameId) -> Result<GameRecord, StorageError> {
        match fs::read(self.game_path(id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::GameNotFound { game_id: *id })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, record: &GameRecord) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        Self::write_atomic(&self.game_path(&record.game.id), bytes).await?;
        debug!(game_id = %record.game.id, version = record.version, "game record written");
        Ok(())
    }

    /// Parse every `*.json` file in `dir`, skipping temp files.
    async fn read_dir_json<T: serde::de::DeserializeOwned>(
        dir: &Path,
    ) -> Result<Vec<T>, StorageError> {
        let mut entries = fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path.extension().is_some_and(|e| e == "json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if is_record {
                paths.push(path);
            }
        }
        paths.sort();

        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = fs::read(&path).await?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl GameStore for FileStore {
    async fn create_game(
        &self,
        game: Game,
        confirmed: usize,
    ) -> Result<GameRecord, StorageError> {
        let lock = self.game_lock(&game.id);
        let _guard = lock.lock().await;
        if fs::try_exists(self.game_path(&game.id)).await? {
            return Err(StorageError::AlreadyExists { game_id: game.id });
        }
        let record = GameRecord::new(game, confirmed);
        self.write_record(&record).await?;
        Ok(record)
    }

    async fn load_game(&self, id: &GameId) -> Result<GameRecord, StorageError> {
        self.read_record(id).await
    }

    async fn save_game(
        &self,
        game: &Game,
        confirmed: usize,
        expected_version: StoreVersion,
    ) -> Result<StoreVersion, StorageError> {
        let lock = self.game_lock(&game.id);
        let _guard = lock.lock().await;
        let mut record = self.read_record(&game.id).await?;
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
        self.write_record(&record).await?;
        Ok(record.version)
    }

    async fn put_game(&self, game: Game, confirmed: usize) -> Result<GameRecord, StorageError> {
        let lock = self.game_lock(&game.id);
        let _guard = lock.lock().await;
        let version = match self.read_record(&game.id).await {
            Ok(existing) => existing.version + 1,
            Err(StorageError::GameNotFound { .. }) => 0,
            Err(e) => return Err(e),
        };
        let mut record = GameRecord::new(game, confirmed);
        record.version = version;
        self.write_record(&record).await?;
        Ok(record)
    }

    async fn delete_game(&self, id: &GameId) -> Result<(), StorageError> {
        let lock = self.game_lock(id);
        let _guard = lock.lock().await;
        match fs::remove_file(self.game_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::GameNotFound { game_id: *id })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_games(&self) -> Result<Vec<GameRecord>, StorageError> {
        let mut records: Vec<GameRecord> = Self::read_dir_json(&self.root.join("games")).await?;
        records.sort_by_key(|r| r.game.id);
        Ok(records)
    }

    async fn save_team(&self, team: TeamRecord) -> Result<(), StorageError> {
        let _guard = self.team_lock.lock().await;
        let bytes = serde_json::to_vec_pretty(&team)?;
        Self::write_atomic(&self.team_path(&team.id), bytes).await
    }

    async fn load_team(&self, id: &Uuid) -> Result<TeamRecord, StorageError> {
        match fs::read(self.team_path(id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::TeamNotFound { team_id: *id })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_teams(&self) -> Result<Vec<TeamRecord>, StorageError> {
        let mut teams: Vec<TeamRecord> = Self::read_dir_json(&self.root.join("teams")).await?;
        teams.sort_by_key(|t| t.id);
        Ok(teams)
    }
}
