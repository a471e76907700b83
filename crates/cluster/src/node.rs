//! Cluster node runtime.
//!
//! A [`ClusterNode`] owns one [`RaftCore`] behind an async mutex and drives
//! it from three sources: a tick loop, messages from peers, and client
//! proposals. After every step it drains the core in a fixed order: log ops
//! are made durable while the core is still locked, then messages go out,
//! then committed effects are written to the local [`GameStore`] and waiting
//! proposers are answered.
//!
//! Store writes for different games run concurrently. Writes for one game
//! are serialized by a per-game lock that remembers the last log index
//! written, so an older effect never lands on top of a newer one.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use ed25519_dalek::SigningKey;
use tokio::sync::{mpsc, oneshot, watch, MutexGuard};
use tracing::{debug, error, info, warn};

use scorebook_model::{Game, GameHeader, GameId, Revision, TeamRecord};
use scorebook_storage::{GameStore, StorageError};
use scorebook_sync::{
    authority, AppendAck, AppendRequest, HelloRequest, HelloResponse, SubmitRequest,
    WatchResponse,
};

use crate::command::{Command, CommandOutput, Effect, Membership, NodeId};
use crate::config::RaftConfig;
use crate::error::ClusterError;
use crate::identity::{key_fingerprint, public_key_b64, TrustedKeys};
use crate::join::{JoinRequest, JoinResponse, APP_VERSION};
use crate::log_store::LogStore;
use crate::machine::GameMachine;
use crate::raft::{Applied, Envelope, LogIndex, RaftCore, RaftStatus, Term};
use crate::transport::PeerTransport;

/// How a node with an empty consensus log comes up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartMode {
    /// Form a one-voter cluster from whatever the game store holds.
    Bootstrap,
    /// Wait for [`ClusterNode::join`]; replicated traffic is ignored until
    /// the handshake succeeds.
    Join,
}

pub struct NodeOptions {
    pub node_id: NodeId,
    pub advertise_addr: String,
    pub raft: RaftConfig,
    pub signing_key: SigningKey,
    pub trusted: TrustedKeys,
    pub non_voter: bool,
    pub mode: StartMode,
}

type Waiter = oneshot::Sender<Result<CommandOutput, ClusterError>>;

pub struct ClusterNode {
    id: NodeId,
    addr: String,
    config: RaftConfig,
    signing_key: SigningKey,
    trusted: TrustedKeys,
    non_voter: bool,

    core: tokio::sync::Mutex<RaftCore>,
    store: Arc<dyn GameStore>,
    log_store: Arc<dyn LogStore>,
    transport: Arc<dyn PeerTransport>,

    waiters: Mutex<BTreeMap<LogIndex, (Term, Waiter)>>,
    game_locks: Mutex<HashMap<GameId, Arc<tokio::sync::Mutex<LogIndex>>>>,
    outbound: Mutex<HashMap<String, mpsc::UnboundedSender<Envelope>>>,
    promoting: Mutex<BTreeSet<NodeId>>,
    /// Last log index applied here; watchers wake on every change.
    applied_index: watch::Sender<LogIndex>,
    accepting: AtomicBool,
    stopped: AtomicBool,
    me: Weak<ClusterNode>,
}

impl ClusterNode {
    /// Recover or create consensus state and start the tick loop.
    ///
    /// A node whose log store already holds state resumes from it and
    /// ignores `mode`.
    pub async fn start(
        options: NodeOptions,
        store: Arc<dyn GameStore>,
        log_store: Arc<dyn LogStore>,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Arc<Self>, ClusterError> {
        let persisted = log_store.load().await?;
        let resumed = !persisted.is_empty();

        let core = if resumed {
            info!(node_id = %options.node_id, "resuming from persisted consensus state");
            RaftCore::restore(
                &options.node_id,
                &options.advertise_addr,
                options.raft,
                persisted,
            )
        } else {
            match options.mode {
                StartMode::Bootstrap => {
                    let games: Vec<Game> = store
                        .list_games()
                        .await?
                        .into_iter()
                        .map(|r| r.game)
                        .collect();
                    let teams = store.list_teams().await?;
                    let membership = Membership::single(
                        &options.node_id,
                        &options.advertise_addr,
                        &public_key_b64(&options.signing_key.verifying_key()),
                    );
                    let machine = GameMachine::seeded(games, teams, membership);
                    let mut core = RaftCore::new(
                        &options.node_id,
                        &options.advertise_addr,
                        options.raft,
                        machine,
                    );
                    core.bootstrap();
                    core
                }
                StartMode::Join => RaftCore::new(
                    &options.node_id,
                    &options.advertise_addr,
                    options.raft,
                    GameMachine::new(),
                ),
            }
        };
        let accepting = resumed || options.mode == StartMode::Bootstrap;

        let node = Arc::new_cyclic(|me| ClusterNode {
            id: options.node_id,
            addr: options.advertise_addr,
            config: options.raft,
            signing_key: options.signing_key,
            trusted: options.trusted,
            non_voter: options.non_voter,
            core: tokio::sync::Mutex::new(core),
            store,
            log_store,
            transport,
            waiters: Mutex::new(BTreeMap::new()),
            game_locks: Mutex::new(HashMap::new()),
            outbound: Mutex::new(HashMap::new()),
            promoting: Mutex::new(BTreeSet::new()),
            applied_index: watch::channel(0).0,
            accepting: AtomicBool::new(accepting),
            stopped: AtomicBool::new(false),
            me: me.clone(),
        });

        let core = node.core.lock().await;
        node.drive(core).await?;
        node.spawn_ticker();
        info!(
            node_id = %node.id,
            addr = %node.addr,
            app_version = APP_VERSION,
            trusted_keys = node.trusted.len(),
            "cluster node started"
        );
        Ok(node)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn spawn_ticker(&self) {
        let me = self.me.clone();
        let period = self.config.tick_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(node) = me.upgrade() else { break };
                if node.stopped.load(Ordering::SeqCst) {
                    break;
                }
                let mut core = node.core.lock().await;
                core.tick();
                if let Err(e) = node.drive(core).await {
                    error!(node_id = %node.id, error = %e, "tick failed");
                }
            }
        });
    }

    // ── Driving the core ─────────────────────────────────────────────────────

    /// Drain the core after a step: persist, send, apply.
    async fn drive(&self, mut core: MutexGuard<'_, RaftCore>) -> Result<(), ClusterError> {
        let ops = core.take_log_ops();
        if !ops.is_empty() {
            self.log_store.persist(ops).await?;
        }
        let outgoing: Vec<(Option<String>, Envelope)> = core
            .take_outbox()
            .into_iter()
            .map(|env| (core.addr_of(&env.to), env))
            .collect();
        let applied = core.take_applied();
        let is_leader = core.is_leader();
        let caught_up = core.learners_caught_up();
        drop(core);

        for (addr, envelope) in outgoing {
            match addr {
                Some(addr) => self.dispatch(addr, envelope),
                None => debug!(node_id = %self.id, to = %envelope.to, "no address for peer; dropping message"),
            }
        }
        self.apply(applied).await;
        if !is_leader {
            self.fail_waiters(|| ClusterError::NotLeader { leader_addr: None });
        } else {
            self.promote(caught_up);
        }
        Ok(())
    }

    /// Queue `envelope` on the peer's outbound channel. One sender task per
    /// peer keeps messages to that peer in order.
    fn dispatch(&self, addr: String, envelope: Envelope) {
        let Ok(mut outbound) = self.outbound.lock() else {
            return;
        };
        if let Some(tx) = outbound.get(&addr) {
            if tx.send(envelope.clone()).is_ok() {
                return;
            }
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let transport = self.transport.clone();
        let peer = addr.clone();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if let Err(e) = transport.send(&peer, envelope).await {
                    debug!(%peer, error = %e, "peer send failed");
                }
            }
        });
        let _ = tx.send(envelope);
        outbound.insert(addr, tx);
    }

    async fn apply(&self, applied: Vec<Applied>) {
        let last = applied.last().map(|entry| entry.index);
        for entry in applied {
            for effect in entry.effects {
                if let Err(e) = self.write_effect(entry.index, effect).await {
                    error!(node_id = %self.id, index = entry.index, error = %e, "failed to write committed state");
                }
            }
            let waiter = self
                .waiters
                .lock()
                .ok()
                .and_then(|mut w| w.remove(&entry.index));
            if let Some((term, tx)) = waiter {
                let result = if term == entry.term {
                    Ok(entry.output)
                } else {
                    Err(ClusterError::ProposalDropped)
                };
                let _ = tx.send(result);
            }
        }
        if let Some(index) = last {
            self.applied_index.send_replace(index);
        }
    }

    fn game_lock(&self, id: GameId) -> Arc<tokio::sync::Mutex<LogIndex>> {
        match self.game_locks.lock() {
            Ok(mut locks) => locks.entry(id).or_default().clone(),
            Err(_) => Arc::new(tokio::sync::Mutex::new(0)),
        }
    }

    async fn write_effect(&self, index: LogIndex, effect: Effect) -> Result<(), StorageError> {
        match effect {
            Effect::PutGame(game) => {
                let lock = self.game_lock(game.id);
                let mut written = lock.lock().await;
                if *written > index {
                    return Ok(());
                }
                let confirmed = game.actions.len();
                self.store.put_game(game, confirmed).await?;
                *written = index;
            }
            Effect::DeleteGame(id) => {
                let lock = self.game_lock(id);
                let mut written = lock.lock().await;
                if *written > index {
                    return Ok(());
                }
                match self.store.delete_game(&id).await {
                    Ok(()) | Err(StorageError::GameNotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
                *written = index;
            }
            Effect::PutTeam(team) => self.store.save_team(team).await?,
        }
        Ok(())
    }

    fn fail_waiters(&self, reason: impl Fn() -> ClusterError) {
        let drained = match self.waiters.lock() {
            Ok(mut w) if !w.is_empty() => std::mem::take(&mut *w),
            _ => return,
        };
        for (_, (_, tx)) in drained {
            let _ = tx.send(Err(reason()));
        }
    }

    fn promote(&self, caught_up: Vec<NodeId>) {
        for node_id in caught_up {
            let fresh = self
                .promoting
                .lock()
                .map(|mut p| p.insert(node_id.clone()))
                .unwrap_or(false);
            if !fresh {
                continue;
            }
            let Some(node) = self.me.upgrade() else { return };
            tokio::spawn(async move {
                info!(node_id = %node.id, learner = %node_id, "promoting caught-up learner");
                let result = node
                    .propose(Command::PromoteVoter {
                        node_id: node_id.clone(),
                    })
                    .await;
                if let Err(e) = result {
                    warn!(learner = %node_id, error = %e, "promotion failed");
                }
                if let Ok(mut p) = node.promoting.lock() {
                    p.remove(&node_id);
                }
            });
        }
    }

    // ── Inputs ───────────────────────────────────────────────────────────────

    /// Deliver a consensus message from a peer.
    pub async fn receive(&self, envelope: Envelope) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        if !self.accepting.load(Ordering::SeqCst) {
            debug!(node_id = %self.id, from = %envelope.from, "not joined yet; ignoring message");
            return;
        }
        if envelope.to != self.id {
            warn!(node_id = %self.id, to = %envelope.to, "message addressed to another node");
            return;
        }
        let mut core = self.core.lock().await;
        core.step(envelope);
        if let Err(e) = self.drive(core).await {
            error!(node_id = %self.id, error = %e, "failed to process peer message");
        }
    }

    /// Replicate `command` and wait until it is applied here.
    pub async fn propose(&self, command: Command) -> Result<CommandOutput, ClusterError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ClusterError::Shutdown);
        }
        let name = command.name();
        let (tx, rx) = oneshot::channel();
        let mut core = self.core.lock().await;
        let (index, term) = core.propose(command).map_err(|nl| ClusterError::NotLeader {
            leader_addr: nl.leader_addr,
        })?;
        debug!(node_id = %self.id, command = name, index, term, "proposed");
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.insert(index, (term, tx));
        }
        self.drive(core).await?;

        match tokio::time::timeout(self.config.commit_timeout(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClusterError::ProposalDropped),
            Err(_) => {
                if let Ok(mut waiters) = self.waiters.lock() {
                    waiters.remove(&index);
                }
                warn!(node_id = %self.id, command = name, index, "commit timed out");
                Err(ClusterError::QuorumTimeout)
            }
        }
    }

    // ── Game operations ──────────────────────────────────────────────────────

    pub async fn create_game(&self, game: Game) -> Result<AppendAck, ClusterError> {
        expect_ack(self.propose(Command::CreateGame { game }).await?)
    }

    pub async fn append(&self, req: AppendRequest) -> Result<AppendAck, ClusterError> {
        expect_ack(
            self.propose(Command::AppendActions {
                game_id: req.game_id,
                expected_revision: Some(req.expected_revision),
                actions: req.actions,
            })
            .await?,
        )
    }

    pub async fn submit(
        &self,
        game_id: GameId,
        req: SubmitRequest,
    ) -> Result<AppendAck, ClusterError> {
        expect_ack(
            self.propose(Command::AppendActions {
                game_id,
                expected_revision: req.expected_revision,
                actions: vec![req.action],
            })
            .await?,
        )
    }

    pub async fn overwrite(&self, game: Game) -> Result<AppendAck, ClusterError> {
        expect_ack(self.propose(Command::OverwriteLog { game }).await?)
    }

    pub async fn delete_game(&self, game_id: GameId) -> Result<(), ClusterError> {
        expect_done(self.propose(Command::DeleteGame { game_id }).await?)
    }

    pub async fn put_team(&self, team: TeamRecord) -> Result<(), ClusterError> {
        expect_done(self.propose(Command::PutTeam { team }).await?)
    }

    pub async fn remove_node(&self, node_id: &str) -> Result<(), ClusterError> {
        expect_done(
            self.propose(Command::RemoveNode {
                node_id: node_id.to_string(),
            })
            .await?,
        )
    }

    /// Reconnect handshake. Answered by the leader only, so a client never
    /// compares against a lagging replica.
    pub async fn hello(&self, req: &HelloRequest) -> Result<HelloResponse, ClusterError> {
        let core = self.core.lock().await;
        if !core.is_leader() {
            return Err(ClusterError::NotLeader {
                leader_addr: core.not_leader().leader_addr,
            });
        }
        Ok(authority::answer_hello(core.machine().game(&req.game_id), req))
    }

    /// Committed state as applied on this node.
    pub async fn game(&self, id: &GameId) -> Option<Game> {
        self.core.lock().await.machine().game(id).cloned()
    }

    /// Long-poll this replica until the game's revision passes `after` or
    /// `wait` runs out.
    pub async fn watch_game(&self, id: &GameId, after: Revision, wait: Duration) -> WatchResponse {
        let mut applied = self.applied_index.subscribe();
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let revision = match self.game(id).await {
                None => return WatchResponse::Gone,
                Some(game) if game.revision > after => {
                    return WatchResponse::Changed {
                        revision: game.revision,
                    }
                }
                Some(game) => game.revision,
            };
            match tokio::time::timeout_at(deadline, applied.changed()).await {
                Ok(Ok(())) => continue,
                _ => return WatchResponse::Unchanged { revision },
            }
        }
    }

    pub async fn list_games(&self) -> Vec<GameHeader> {
        self.core
            .lock()
            .await
            .machine()
            .games()
            .map(Game::header)
            .collect()
    }

    pub async fn teams(&self) -> Vec<TeamRecord> {
        self.core.lock().await.machine().teams().cloned().collect()
    }

    pub async fn status(&self) -> RaftStatus {
        self.core.lock().await.status()
    }

    pub async fn is_leader(&self) -> bool {
        self.core.lock().await.is_leader()
    }

    // ── Membership ───────────────────────────────────────────────────────────

    /// Leader side of the join handshake. Verifies the request, adds the
    /// node as a learner, and answers with a signed acceptance.
    pub async fn handle_join(&self, request: JoinRequest) -> Result<JoinResponse, ClusterError> {
        let key = match request.verify(&self.trusted) {
            Ok(key) => key,
            Err(e) => {
                warn!(
                    node_id = %self.id,
                    joiner = %request.claims.node_id,
                    error = %e,
                    "join rejected"
                );
                return Err(e.into());
            }
        };
        if request.claims.app_version != APP_VERSION {
            info!(
                joiner = %request.claims.node_id,
                theirs = %request.claims.app_version,
                ours = APP_VERSION,
                "joiner runs a different application version"
            );
        }

        let existing = {
            let core = self.core.lock().await;
            if !core.is_leader() {
                return Err(ClusterError::NotLeader {
                    leader_addr: core.not_leader().leader_addr,
                });
            }
            core.membership().nodes.get(&request.claims.node_id).cloned()
        };
        let claims = &request.claims;
        match existing {
            Some(member) if member.public_key != claims.public_key => {
                return Err(ClusterError::Forbidden(format!(
                    "node id {} is held by a different key",
                    claims.node_id
                )));
            }
            Some(member) if member.addr == claims.advertise_addr => {
                debug!(joiner = %claims.node_id, "node is already a member");
            }
            _ => {
                expect_done(
                    self.propose(Command::AddLearner {
                        node_id: claims.node_id.clone(),
                        addr: claims.advertise_addr.clone(),
                        public_key: claims.public_key.clone(),
                        non_voter: claims.non_voter,
                    })
                    .await?,
                )?;
            }
        }
        info!(
            node_id = %self.id,
            joiner = %claims.node_id,
            addr = %claims.advertise_addr,
            fingerprint = %key_fingerprint(&key),
            "node admitted as learner"
        );
        Ok(JoinResponse::new(
            &self.id,
            &self.addr,
            claims,
            &self.signing_key,
        ))
    }

    /// Joiner side: ask `seed` for admission and start accepting replicated
    /// state once the leader's answer verifies.
    pub async fn join(&self, seed: &str) -> Result<(), ClusterError> {
        let request = JoinRequest::new(
            &self.id,
            &self.addr,
            &self.addr,
            self.non_voter,
            &self.signing_key,
        );
        let response = self.transport.join(seed, request.clone()).await?;
        response.verify(&request.claims, &self.trusted)?;
        self.accepting.store(true, Ordering::SeqCst);
        info!(
            node_id = %self.id,
            leader = %response.claims.leader_id,
            leader_addr = %response.claims.leader_addr,
            "joined cluster"
        );
        Ok(())
    }

    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.clear();
        }
        self.fail_waiters(|| ClusterError::Shutdown);
        info!(node_id = %self.id, "cluster node stopped");
    }
}

fn expect_ack(output: CommandOutput) -> Result<AppendAck, ClusterError> {
    match output {
        CommandOutput::Ack(ack) => Ok(ack),
        other => expect_done(other).and(Err(ClusterError::Config(
            "command produced no acknowledgement".to_string(),
        ))),
    }
}

fn expect_done(output: CommandOutput) -> Result<(), ClusterError> {
    match output {
        CommandOutput::Ack(_) | CommandOutput::Done => Ok(()),
        CommandOutput::Conflict { message, revision } => {
            Err(ClusterError::Conflict { message, revision })
        }
        CommandOutput::NotFound(what) => Err(ClusterError::NotFound(what)),
    }
}
