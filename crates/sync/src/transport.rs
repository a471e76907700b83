use async_trait::async_trait;

use scorebook_model::{Game, GameId, Revision};

use crate::error::SyncError;
use crate::protocol::{
    AppendAck, AppendRequest, CreateRequest, HelloRequest, HelloResponse, OverwriteRequest,
    WatchResponse,
};

/// Connection from a client session to the authoritative copy of its games.
///
/// Implementations report an unreachable server as
/// [`SyncError::Unavailable`] so the session can drop to `Disconnected`
/// and keep its queue intact. Leader redirects are the transport's concern;
/// a session never sees [`SyncError::NotLeader`] unless redirects run out.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn hello(&self, req: HelloRequest) -> Result<HelloResponse, SyncError>;

    async fn append(&self, req: AppendRequest) -> Result<AppendAck, SyncError>;

    async fn overwrite(&self, req: OverwriteRequest) -> Result<AppendAck, SyncError>;

    async fn create(&self, req: CreateRequest) -> Result<AppendAck, SyncError>;

    async fn fetch(&self, game_id: GameId) -> Result<Game, SyncError>;

    async fn delete(&self, game_id: GameId) -> Result<(), SyncError>;

    /// Wait until the game's committed revision passes `after`, or until the
    /// server gives up waiting.
    async fn watch(&self, game_id: GameId, after: Revision) -> Result<WatchResponse, SyncError>;
}
