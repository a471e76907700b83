//! In-process authoritative server and a transport that reaches it directly.
//!
//! Several [`InProcessTransport`]s can share one [`InProcessServer`] to act
//! as independent clients of the same game; each can be taken offline
//! separately.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use scorebook_model::{Game, GameId, Revision};

use crate::authority;
use crate::error::SyncError;
use crate::protocol::{
    AppendAck, AppendRequest, CreateRequest, HelloRequest, HelloResponse, OverwriteRequest,
    WatchResponse,
};
use crate::transport::SyncTransport;

/// How long a watch waits for a commit before answering `Unchanged`.
const WATCH_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct InProcessServer {
    games: Mutex<BTreeMap<GameId, Game>>,
    /// Bumped after every write.
    changes: watch::Sender<u64>,
}

impl Default for InProcessServer {
    fn default() -> Self {
        InProcessServer {
            games: Mutex::new(BTreeMap::new()),
            changes: watch::channel(0).0,
        }
    }
}

impl InProcessServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn changed(&self) {
        self.changes.send_modify(|n| *n += 1);
    }

    pub async fn game(&self, id: &GameId) -> Option<Game> {
        self.games.lock().await.get(id).cloned()
    }

    pub async fn game_ids(&self) -> Vec<GameId> {
        self.games.lock().await.keys().copied().collect()
    }
}

#[derive(Debug, Clone)]
pub struct InProcessTransport {
    server: Arc<InProcessServer>,
    online: Arc<AtomicBool>,
    lose_ack: Arc<AtomicBool>,
}

impl InProcessTransport {
    pub fn new(server: Arc<InProcessServer>) -> Self {
        InProcessTransport {
            server,
            online: Arc::new(AtomicBool::new(true)),
            lose_ack: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Commit the next append but answer it with `QuorumTimeout`, as a
    /// leader does when the commit lands after its wait ran out.
    pub fn lose_next_ack(&self) {
        self.lose_ack.store(true, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), SyncError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::Unavailable("offline".to_string()))
        }
    }
}

#[async_trait]
impl SyncTransport for InProcessTransport {
    async fn hello(&self, req: HelloRequest) -> Result<HelloResponse, SyncError> {
        self.check_online()?;
        let games = self.server.games.lock().await;
        Ok(authority::answer_hello(games.get(&req.game_id), &req))
    }

    async fn append(&self, req: AppendRequest) -> Result<AppendAck, SyncError> {
        self.check_online()?;
        let mut games = self.server.games.lock().await;
        let game = games
            .get_mut(&req.game_id)
            .ok_or_else(|| authority::not_found(&req.game_id))?;
        let ack = authority::apply_append(game, Some(req.expected_revision), req.actions)?;
        drop(games);
        self.server.changed();
        if self.lose_ack.swap(false, Ordering::SeqCst) {
            return Err(SyncError::QuorumTimeout);
        }
        Ok(ack)
    }

    async fn overwrite(&self, req: OverwriteRequest) -> Result<AppendAck, SyncError> {
        self.check_online()?;
        let mut games = self.server.games.lock().await;
        let game = games
            .get_mut(&req.game.id)
            .ok_or_else(|| authority::not_found(&req.game.id))?;
        let ack = authority::apply_overwrite(game, req.game)?;
        drop(games);
        self.server.changed();
        Ok(ack)
    }

    async fn create(&self, req: CreateRequest) -> Result<AppendAck, SyncError> {
        self.check_online()?;
        let mut games = self.server.games.lock().await;
        let game = authority::admit_new(games.get(&req.game.id), req.game)?;
        let ack = authority::ack(&game, false);
        games.insert(game.id, game);
        drop(games);
        self.server.changed();
        Ok(ack)
    }

    async fn fetch(&self, game_id: GameId) -> Result<Game, SyncError> {
        self.check_online()?;
        self.server
            .game(&game_id)
            .await
            .ok_or_else(|| authority::not_found(&game_id))
    }

    async fn delete(&self, game_id: GameId) -> Result<(), SyncError> {
        self.check_online()?;
        let removed = self.server.games.lock().await.remove(&game_id);
        removed.ok_or_else(|| authority::not_found(&game_id))?;
        self.server.changed();
        Ok(())
    }

    async fn watch(&self, game_id: GameId, after: Revision) -> Result<WatchResponse, SyncError> {
        self.check_online()?;
        let mut changes = self.server.changes.subscribe();
        let deadline = tokio::time::Instant::now() + WATCH_WAIT;
        loop {
            let revision = match self.server.game(&game_id).await {
                None => return Ok(WatchResponse::Gone),
                Some(game) if game.revision > after => {
                    return Ok(WatchResponse::Changed {
                        revision: game.revision,
                    })
                }
                Some(game) => game.revision,
            };
            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                _ => return Ok(WatchResponse::Unchanged { revision }),
            }
        }
    }
}
