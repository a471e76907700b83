//! Client sync session for one game.
//!
//! State machine: `Disconnected → Connecting → Synced → (Diverged | Disconnected)`.
//!
//! The local log is the source of truth for the UI. Every recorded action
//! is appended, replayed, and persisted before anything touches the
//! network, so losing the connection never loses an action. Actions past
//! the confirmed prefix form the outbound queue; a flush sends the whole
//! queue as one batch so the server commits it as one contiguous run.
//!
//! All mutating methods take `&mut self`: one session owns one game's log
//! and no two mutations of it interleave.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use scorebook_model::{log_digest, Action, ActionId, Game, GameId};
use scorebook_replay::{
    linearize, redo_target_id, replay_incremental, replay_with_diagnostics, undo_target_id,
    Diagnostic, GameState, History,
};
use scorebook_storage::{GameStore, StoreVersion};

use crate::error::SyncError;
use crate::protocol::{
    AppendRequest, CreateRequest, HelloRequest, HelloResponse, OverwriteRequest, WatchResponse,
};
use crate::transport::SyncTransport;

/// Append rounds in one flush. A round that finds the server moved re-runs
/// the handshake, which may leave part of the queue still to send.
const FLUSH_ROUNDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Disconnected,
    Connecting,
    Synced,
    Diverged,
}

/// What the server holds when the session diverged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub server: Game,
    /// Local actions the server has never acknowledged.
    pub local_only: usize,
}

/// How to leave `Diverged`. There is no automatic merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Drop local-only actions and adopt the server log.
    OverwriteLocal,
    /// Keep the local log under a new game id; the original stays as the
    /// server has it.
    Fork,
    /// Push the local log as authoritative. Other synced clients will
    /// diverge on their next contact.
    ForceSave,
}

pub struct SyncSession<S: GameStore, T: SyncTransport> {
    store: Arc<S>,
    transport: T,
    game: Game,
    confirmed: usize,
    version: StoreVersion,
    initial: GameState,
    state: GameState,
    status: SyncState,
    divergence: Option<Divergence>,
}

impl<S: GameStore, T: SyncTransport> SyncSession<S, T> {
    /// Start a session for a brand-new game. It is created on the server on
    /// the first successful connect.
    pub async fn create(store: Arc<S>, transport: T, game: Game) -> Result<Self, SyncError> {
        let record = store.create_game(game, 0).await?;
        Ok(Self::from_parts(store, transport, record.game, 0, record.version))
    }

    /// Resume a session for a game in the local store.
    pub async fn open(store: Arc<S>, transport: T, id: GameId) -> Result<Self, SyncError> {
        let record = store.load_game(&id).await?;
        Ok(Self::from_parts(
            store,
            transport,
            record.game,
            record.confirmed,
            record.version,
        ))
    }

    /// Adopt a game that exists on the server but not locally.
    pub async fn checkout(store: Arc<S>, transport: T, id: GameId) -> Result<Self, SyncError> {
        let game = transport.fetch(id).await?;
        let confirmed = game.actions.len();
        let record = store.put_game(game, confirmed).await?;
        let mut session =
            Self::from_parts(store, transport, record.game, confirmed, record.version);
        session.status = SyncState::Synced;
        Ok(session)
    }

    fn from_parts(
        store: Arc<S>,
        transport: T,
        game: Game,
        confirmed: usize,
        version: StoreVersion,
    ) -> Self {
        let initial = GameState::new(&game);
        let mut session = SyncSession {
            store,
            transport,
            state: initial.clone(),
            initial,
            confirmed: confirmed.min(game.actions.len()),
            game,
            version,
            status: SyncState::Disconnected,
            divergence: None,
        };
        session.rebuild();
        session
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn game_id(&self) -> GameId {
        self.game.id
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn status(&self) -> SyncState {
        self.status
    }

    pub fn divergence(&self) -> Option<&Divergence> {
        self.divergence.as_ref()
    }

    pub fn confirmed(&self) -> usize {
        self.confirmed
    }

    /// Actions recorded locally and not yet acknowledged.
    pub fn pending(&self) -> &[Action] {
        &self.game.actions[self.confirmed..]
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn history(&self) -> History {
        linearize(&self.game)
    }

    // ── Local mutation ───────────────────────────────────────────────────────

    /// Record one action: append, replay, persist, then try to send.
    ///
    /// The action is durable locally before any network I/O. A send that
    /// fails for lack of a connection leaves it queued; other send failures
    /// are returned, with the action still queued.
    pub async fn record(&mut self, action: Action) -> Result<Vec<Diagnostic>, SyncError> {
        self.game.append(action)?;
        let diagnostics = replay_incremental(&self.initial, &mut self.state, &self.game.actions);
        self.persist().await?;
        if self.status == SyncState::Synced {
            self.flush().await?;
        }
        Ok(diagnostics)
    }

    /// Undo the most recent live action, if any.
    pub async fn undo(&mut self) -> Result<Option<ActionId>, SyncError> {
        match undo_target_id(&self.game.actions) {
            Some(target) => {
                self.record(Action::undo(target)).await?;
                Ok(Some(target))
            }
            None => Ok(None),
        }
    }

    /// Redo the most recent undo, if nothing has been recorded since.
    pub async fn redo(&mut self) -> Result<Option<ActionId>, SyncError> {
        match redo_target_id(&self.game.actions) {
            Some(undo_id) => {
                self.record(Action::undo(undo_id)).await?;
                Ok(Some(undo_id))
            }
            None => Ok(None),
        }
    }

    // ── Network ──────────────────────────────────────────────────────────────

    /// (Re)connect: compare the confirmed prefix with the server, then send
    /// the queue if the session ends up `Synced`.
    pub async fn connect(&mut self) -> Result<SyncState, SyncError> {
        self.handshake().await?;
        if self.status == SyncState::Synced {
            self.flush().await?;
        }
        Ok(self.status)
    }

    pub fn disconnect(&mut self) {
        if self.status != SyncState::Diverged {
            self.status = SyncState::Disconnected;
        }
    }

    /// Send every queued action as one batch.
    ///
    /// An ack is adopted only when it accounts for exactly the confirmed
    /// prefix plus this batch. A duplicate ack (the batch committed earlier
    /// and its answer was lost) or one that covers more of the log sends the
    /// session back through the handshake, which picks up whatever else was
    /// committed around the batch.
    pub async fn flush(&mut self) -> Result<(), SyncError> {
        for _ in 0..FLUSH_ROUNDS {
            if self.status != SyncState::Synced || self.pending().is_empty() {
                return Ok(());
            }
            let batch = self.pending().to_vec();
            let sent = batch.len();
            let req = AppendRequest {
                game_id: self.game.id,
                expected_revision: self.game.revision,
                actions: batch,
            };
            match self.transport.append(req).await {
                Ok(ack) if !ack.duplicate && ack.length == self.confirmed + sent => {
                    self.game.revision = ack.revision;
                    self.confirmed += sent;
                    return self.persist().await;
                }
                Ok(ack) => {
                    info!(
                        game_id = %self.game.id,
                        revision = ack.revision,
                        length = ack.length,
                        duplicate = ack.duplicate,
                        "ack does not line up with the local log, re-checking server log"
                    );
                    self.handshake().await?;
                }
                Err(SyncError::Conflict { message, .. }) => {
                    info!(game_id = %self.game.id, %message, "append rejected, re-checking server log");
                    self.handshake().await?;
                }
                Err(e) => return self.on_transport_error(e),
            }
        }
        Ok(())
    }

    /// Wait for commits made by other clients and fast-forward onto them.
    ///
    /// Only a `Synced` session watches; any other status is returned as is.
    pub async fn poll(&mut self) -> Result<SyncState, SyncError> {
        if self.status != SyncState::Synced {
            return Ok(self.status);
        }
        match self.transport.watch(self.game.id, self.game.revision).await {
            Ok(WatchResponse::Unchanged { .. }) => {}
            Ok(WatchResponse::Changed { revision }) => {
                debug!(game_id = %self.game.id, revision, "server moved on");
                self.connect().await?;
            }
            Ok(WatchResponse::Gone) => self.handshake().await?,
            Err(e) => self.on_transport_error(e)?,
        }
        Ok(self.status)
    }

    async fn handshake(&mut self) -> Result<(), SyncError> {
        self.status = SyncState::Connecting;
        let req = HelloRequest {
            game_id: self.game.id,
            revision: self.game.revision,
            confirmed: self.confirmed,
            digest: log_digest(&self.game.actions[..self.confirmed]),
        };
        let response = match self.transport.hello(req).await {
            Ok(r) => r,
            Err(e) => return self.on_transport_error(e),
        };

        match response {
            HelloResponse::UpToDate { revision } => {
                if revision != self.game.revision {
                    self.game.revision = revision;
                    self.persist().await?;
                }
                self.set_synced();
            }

            HelloResponse::FastForward { revision, actions } => {
                // A queued batch whose ack was lost shows up at the head of
                // the server tail. Those actions are ours and already
                // committed.
                let echoed = self
                    .pending()
                    .iter()
                    .zip(&actions)
                    .take_while(|(local, remote)| local.id == remote.id)
                    .count();
                if echoed > 0 {
                    info!(game_id = %self.game.id, echoed, "server already holds queued actions");
                    self.confirmed += echoed;
                }
                let foreign = &actions[echoed..];

                if self.pending().is_empty() {
                    if !foreign.is_empty() {
                        info!(game_id = %self.game.id, count = foreign.len(), "fast-forwarding");
                        self.game.append_all(foreign.to_vec())?;
                        self.rebuild();
                    }
                    self.game.revision = revision;
                    self.confirmed = self.game.actions.len();
                    self.persist().await?;
                    self.set_synced();
                } else if foreign.is_empty() {
                    self.game.revision = revision;
                    self.persist().await?;
                    self.set_synced();
                } else {
                    let mut server = self.game.clone();
                    server.actions.truncate(self.confirmed);
                    server.append_all(foreign.to_vec())?;
                    server.revision = revision;
                    self.diverge(server);
                }
            }

            HelloResponse::Diverged { game } => self.diverge(game),

            HelloResponse::Gone => {
                if self.game.revision == 0 {
                    // Never committed: this client is the one that creates it.
                    let ack = match self
                        .transport
                        .create(CreateRequest {
                            game: self.game.clone(),
                        })
                        .await
                    {
                        Ok(ack) => ack,
                        Err(e) => return self.on_transport_error(e),
                    };
                    self.game.revision = ack.revision;
                    self.confirmed = ack.length.min(self.game.actions.len());
                    self.persist().await?;
                    self.set_synced();
                } else {
                    info!(game_id = %self.game.id, "game deleted on server, removing local copy");
                    self.store.delete_game(&self.game.id).await?;
                    self.status = SyncState::Disconnected;
                    return Err(SyncError::Gone(self.game.id));
                }
            }
        }
        Ok(())
    }

    /// Leave `Diverged` by one of the three resolutions.
    pub async fn resolve(&mut self, resolution: Resolution) -> Result<SyncState, SyncError> {
        let Some(divergence) = self.divergence.take() else {
            return Err(SyncError::NotDiverged);
        };
        info!(game_id = %self.game.id, ?resolution, "resolving divergence");

        match resolution {
            Resolution::OverwriteLocal => {
                self.game = divergence.server;
                self.confirmed = self.game.actions.len();
                self.rebuild();
                self.persist().await?;
                self.set_synced();
                Ok(self.status)
            }

            Resolution::Fork => {
                let forked = self.game.fork(Uuid::new_v4(), self.game.actions.clone());
                let server_len = divergence.server.actions.len();
                // The original id now mirrors the server.
                self.store.put_game(divergence.server, server_len).await?;

                let record = self.store.create_game(forked, 0).await?;
                info!(from = %self.game.id, to = %record.game.id, "forked local log");
                self.game = record.game;
                self.version = record.version;
                self.confirmed = 0;
                self.rebuild();
                self.status = SyncState::Disconnected;
                self.connect().await
            }

            Resolution::ForceSave => {
                let req = OverwriteRequest {
                    game: self.game.clone(),
                };
                match self.transport.overwrite(req).await {
                    Ok(ack) => {
                        self.game.revision = ack.revision;
                        self.confirmed = self.game.actions.len();
                        self.persist().await?;
                        self.set_synced();
                        Ok(self.status)
                    }
                    Err(e) => {
                        self.divergence = Some(divergence);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Delete the game everywhere.
    pub async fn delete(self) -> Result<(), SyncError> {
        match self.transport.delete(self.game.id).await {
            Ok(()) | Err(SyncError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.store.delete_game(&self.game.id).await?;
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn set_synced(&mut self) {
        if self.status != SyncState::Synced {
            info!(game_id = %self.game.id, revision = self.game.revision, "synced");
        }
        self.status = SyncState::Synced;
        self.divergence = None;
    }

    fn diverge(&mut self, server: Game) {
        let local_only = self.game.actions.len() - self.confirmed;
        warn!(
            game_id = %self.game.id,
            local_only,
            server_revision = server.revision,
            "local log diverged from server"
        );
        self.status = SyncState::Diverged;
        self.divergence = Some(Divergence { server, local_only });
    }

    fn on_transport_error(&mut self, e: SyncError) -> Result<(), SyncError> {
        match e {
            SyncError::Unavailable(reason) => {
                info!(game_id = %self.game.id, %reason, "server unreachable, queueing locally");
                self.status = SyncState::Disconnected;
                Ok(())
            }
            other => {
                if self.status == SyncState::Connecting {
                    self.status = SyncState::Disconnected;
                }
                Err(other)
            }
        }
    }

    fn rebuild(&mut self) {
        self.initial = GameState::new(&self.game);
        self.state = replay_with_diagnostics(&self.initial, &self.game.actions).state;
    }

    async fn persist(&mut self) -> Result<(), SyncError> {
        self.version = self
            .store
            .save_game(&self.game, self.confirmed, self.version)
            .await?;
        Ok(())
    }
}
