//! Deterministic consensus core.
//!
//! `RaftCore` performs no I/O and reads no clock. The runtime drives it with
//! [`tick`](RaftCore::tick), [`step`](RaftCore::step), and
//! [`propose`](RaftCore::propose), then drains three queues:
//!
//! - [`take_log_ops`](RaftCore::take_log_ops): state to make durable first,
//! - [`take_outbox`](RaftCore::take_outbox): messages to send after that,
//! - [`take_applied`](RaftCore::take_applied): committed commands, in order,
//!   with their outputs and store effects.
//!
//! Membership lives in the state machine and takes effect when its command
//! is applied. Only voters start elections and count towards quorum; a
//! learner is replicated to but never waited on.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandOutput, Effect, Membership, NodeId};
use crate::config::RaftConfig;
use crate::log_store::{LogOp, PersistedLog};
use crate::machine::{ClusterSnapshot, GameMachine};

use super::log::{Entry, RaftLog};
use super::message::{Envelope, Message};
use super::{LogIndex, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    Leader,
    Follower,
    Candidate,
}

/// One committed entry after it was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub index: LogIndex,
    pub term: Term,
    pub output: CommandOutput,
    pub effects: Vec<Effect>,
}

/// Returned by `propose` on a node that does not lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotLeader {
    pub leader_id: Option<NodeId>,
    pub leader_addr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaftStatus {
    pub node_id: NodeId,
    #[serde(rename = "state")]
    pub role: Role,
    pub term: Term,
    pub leader_id: Option<NodeId>,
    pub leader_addr: Option<String>,
    pub commit_index: LogIndex,
    pub applied_index: LogIndex,
    pub last_log_index: LogIndex,
    pub snapshot_index: LogIndex,
    pub voters: Vec<NodeId>,
    pub learners: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    next_index: LogIndex,
    match_index: LogIndex,
    /// Heartbeats left before an unanswered snapshot is sent again.
    snapshot_wait: Option<u32>,
}

pub struct RaftCore {
    id: NodeId,
    addr: String,
    config: RaftConfig,

    term: Term,
    voted_for: Option<NodeId>,
    role: Role,
    leader: Option<NodeId>,

    log: RaftLog,
    commit_index: LogIndex,
    last_applied: LogIndex,
    machine: GameMachine,
    snapshot: Option<ClusterSnapshot>,

    election_elapsed: u32,
    election_timeout: u32,
    heartbeat_elapsed: u32,
    votes: BTreeSet<NodeId>,
    progress: BTreeMap<NodeId, Progress>,
    peer_addrs: BTreeMap<NodeId, String>,
    rng: StdRng,

    outbox: Vec<Envelope>,
    log_ops: Vec<LogOp>,
    applied: Vec<Applied>,
}

impl RaftCore {
    /// A fresh follower with no log.
    pub fn new(id: &str, addr: &str, config: RaftConfig, machine: GameMachine) -> Self {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let mut core = RaftCore {
            id: id.to_string(),
            addr: addr.to_string(),
            config,
            term: 0,
            voted_for: None,
            role: Role::Follower,
            leader: None,
            log: RaftLog::new(),
            commit_index: 0,
            last_applied: 0,
            machine,
            snapshot: None,
            election_elapsed: 0,
            election_timeout: config.election_ticks,
            heartbeat_elapsed: 0,
            votes: BTreeSet::new(),
            progress: BTreeMap::new(),
            peer_addrs: BTreeMap::new(),
            rng: StdRng::seed_from_u64(hasher.finish()),
            outbox: Vec::new(),
            log_ops: Vec::new(),
            applied: Vec::new(),
        };
        core.reset_election_timer();
        core
    }

    /// Rebuild from durable state after a restart.
    pub fn restore(id: &str, addr: &str, config: RaftConfig, persisted: PersistedLog) -> Self {
        let mut core = Self::new(id, addr, config, GameMachine::new());
        core.term = persisted.term;
        core.voted_for = persisted.voted_for;
        match persisted.snapshot {
            Some(snapshot) => {
                core.machine.restore(&snapshot);
                core.log = RaftLog::restore(snapshot.index, snapshot.term, persisted.entries);
                core.commit_index = snapshot.index;
                core.last_applied = snapshot.index;
                core.snapshot = Some(snapshot);
            }
            None => core.log = RaftLog::restore(0, 0, persisted.entries),
        }
        info!(
            node_id = %core.id,
            term = core.term,
            snapshot_index = core.log.snapshot_index(),
            last_index = core.log.last_index(),
            "restored consensus state"
        );
        core
    }

    /// Form a one-node cluster around the current state machine, which must
    /// already list this node as its only voter. The seeded state becomes
    /// the snapshot at index 1, so every later joiner receives it.
    pub fn bootstrap(&mut self) {
        if self.log.last_index() > 0 {
            warn!(node_id = %self.id, "bootstrap ignored: log is not empty");
            return;
        }
        let snapshot = self.machine.snapshot(1, 1);
        self.log.reset(1, 1);
        self.commit_index = 1;
        self.last_applied = 1;
        self.term = 1;
        self.log_ops.push(LogOp::Snapshot {
            snapshot: snapshot.clone(),
        });
        self.persist_hard_state();
        self.snapshot = Some(snapshot);
        info!(
            node_id = %self.id,
            games = self.machine.games().count(),
            "bootstrapped new cluster"
        );
        self.campaign();
        self.apply_ready();
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.leader.as_deref()
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn last_index(&self) -> LogIndex {
        self.log.last_index()
    }

    pub fn snapshot_index(&self) -> LogIndex {
        self.log.snapshot_index()
    }

    pub fn machine(&self) -> &GameMachine {
        &self.machine
    }

    pub fn membership(&self) -> &Membership {
        self.machine.membership()
    }

    pub fn addr_of(&self, id: &str) -> Option<String> {
        if id == self.id {
            return Some(self.addr.clone());
        }
        self.membership()
            .addr(id)
            .map(str::to_string)
            .or_else(|| self.peer_addrs.get(id).cloned())
    }

    pub fn not_leader(&self) -> NotLeader {
        NotLeader {
            leader_id: self.leader.clone(),
            leader_addr: self.leader.as_deref().and_then(|l| self.addr_of(l)),
        }
    }

    pub fn status(&self) -> RaftStatus {
        let membership = self.membership();
        RaftStatus {
            node_id: self.id.clone(),
            role: self.role,
            term: self.term,
            leader_id: self.leader.clone(),
            leader_addr: self.leader.as_deref().and_then(|l| self.addr_of(l)),
            commit_index: self.commit_index,
            applied_index: self.last_applied,
            last_log_index: self.log.last_index(),
            snapshot_index: self.log.snapshot_index(),
            voters: membership.voters().cloned().collect(),
            learners: membership.learners().cloned().collect(),
        }
    }

    /// Learners the leader has brought up to its commit index.
    pub fn learners_caught_up(&self) -> Vec<NodeId> {
        if !self.is_leader() || self.commit_index == 0 {
            return Vec::new();
        }
        self.membership()
            .nodes
            .iter()
            .filter(|(_, m)| !m.voter && !m.non_voter)
            .filter(|(id, _)| {
                self.progress.get(*id).is_some_and(|p| {
                    p.snapshot_wait.is_none() && p.match_index >= self.commit_index
                })
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn take_outbox(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_log_ops(&mut self) -> Vec<LogOp> {
        std::mem::take(&mut self.log_ops)
    }

    pub fn take_applied(&mut self) -> Vec<Applied> {
        std::mem::take(&mut self.applied)
    }

    // ── Inputs ───────────────────────────────────────────────────────────────

    pub fn tick(&mut self) {
        match self.role {
            Role::Leader => {
                self.heartbeat_elapsed += 1;
                if self.heartbeat_elapsed >= self.config.heartbeat_ticks {
                    self.heartbeat_elapsed = 0;
                    self.heartbeat();
                }
            }
            Role::Follower | Role::Candidate => {
                self.election_elapsed += 1;
                if self.election_elapsed >= self.election_timeout
                    && self.membership().is_voter(&self.id)
                {
                    self.campaign();
                }
            }
        }
        self.apply_ready();
    }

    /// Append a command to the log. Returns its position; the command takes
    /// effect once that position is committed.
    pub fn propose(&mut self, command: Command) -> Result<(LogIndex, Term), NotLeader> {
        if !self.is_leader() {
            return Err(self.not_leader());
        }
        let entry = self.append_local(command);
        self.maybe_commit();
        self.broadcast_append();
        self.apply_ready();
        Ok((entry.index, entry.term))
    }

    pub fn step(&mut self, envelope: Envelope) {
        let Envelope {
            from,
            from_addr,
            message,
            ..
        } = envelope;
        self.peer_addrs.insert(from.clone(), from_addr);

        let msg_term = message.term();
        if msg_term > self.term {
            let leader = match message {
                Message::AppendEntries { .. } | Message::InstallSnapshot { .. } => {
                    Some(from.clone())
                }
                _ => None,
            };
            debug!(node_id = %self.id, %from, term = msg_term, "observed newer term");
            self.become_follower(msg_term, leader);
        }

        match message {
            Message::RequestVote {
                term,
                last_log_index,
                last_log_term,
            } => self.handle_request_vote(from, term, last_log_index, last_log_term),

            Message::Vote { term, granted } => {
                if self.role == Role::Candidate && term == self.term && granted {
                    self.votes.insert(from);
                    if self.has_quorum(&self.votes) {
                        self.become_leader();
                    }
                }
            }

            Message::AppendEntries {
                term,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            } => self.handle_append(from, term, prev_log_index, prev_log_term, entries, leader_commit),

            Message::AppendResponse {
                term,
                success,
                match_index,
            } => self.handle_append_response(from, term, success, match_index),

            Message::InstallSnapshot { term, snapshot } => {
                self.handle_install_snapshot(from, term, snapshot)
            }

            Message::SnapshotResponse { term, last_index } => {
                self.handle_snapshot_response(from, term, last_index)
            }
        }
        self.apply_ready();
    }

    // ── Roles ────────────────────────────────────────────────────────────────

    fn campaign(&mut self) {
        self.term += 1;
        self.role = Role::Candidate;
        self.leader = None;
        self.voted_for = Some(self.id.clone());
        self.votes = BTreeSet::from([self.id.clone()]);
        self.reset_election_timer();
        self.persist_hard_state();
        info!(node_id = %self.id, term = self.term, "starting election");

        if self.has_quorum(&self.votes) {
            self.become_leader();
            return;
        }
        let request = Message::RequestVote {
            term: self.term,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        let voters: Vec<NodeId> = self
            .membership()
            .voters()
            .filter(|v| **v != self.id)
            .cloned()
            .collect();
        for voter in voters {
            self.send(voter, request.clone());
        }
    }

    fn become_leader(&mut self) {
        info!(node_id = %self.id, term = self.term, "became leader");
        self.role = Role::Leader;
        self.leader = Some(self.id.clone());
        self.heartbeat_elapsed = 0;
        self.votes.clear();
        self.progress.clear();
        self.sync_progress();
        self.append_local(Command::Noop);
        self.maybe_commit();
        self.broadcast_append();
    }

    fn become_follower(&mut self, term: Term, leader: Option<NodeId>) {
        if term > self.term {
            self.term = term;
            self.voted_for = None;
            self.persist_hard_state();
        }
        if self.role == Role::Leader {
            info!(node_id = %self.id, term, "stepping down");
        }
        self.role = Role::Follower;
        self.leader = leader;
        self.votes.clear();
        self.progress.clear();
        self.reset_election_timer();
    }

    fn reset_election_timer(&mut self) {
        self.election_elapsed = 0;
        let base = self.config.election_ticks.max(1);
        self.election_timeout = self.rng.gen_range(base..base * 2);
    }

    fn has_quorum(&self, ids: &BTreeSet<NodeId>) -> bool {
        let membership = self.membership();
        let granted = membership.voters().filter(|v| ids.contains(*v)).count();
        granted > 0 && granted >= membership.quorum()
    }

    /// Track every member but this node; forget nodes no longer present.
    fn sync_progress(&mut self) {
        let next_index = self.log.last_index() + 1;
        let members: Vec<NodeId> = self
            .membership()
            .nodes
            .keys()
            .filter(|id| **id != self.id)
            .cloned()
            .collect();
        self.progress.retain(|id, _| members.contains(id));
        for id in members {
            self.progress.entry(id).or_insert(Progress {
                next_index,
                match_index: 0,
                snapshot_wait: None,
            });
        }
    }

    // ── Leader ───────────────────────────────────────────────────────────────

    fn append_local(&mut self, command: Command) -> Entry {
        let entry = self.log.push(self.term, command);
        self.log_ops.push(LogOp::Append {
            entries: vec![entry.clone()],
        });
        entry
    }

    fn maybe_commit(&mut self) {
        if !self.is_leader() {
            return;
        }
        let mut matched: Vec<LogIndex> = self
            .membership()
            .voters()
            .map(|v| {
                if *v == self.id {
                    self.log.last_index()
                } else {
                    self.progress.get(v).map(|p| p.match_index).unwrap_or(0)
                }
            })
            .collect();
        if matched.is_empty() {
            return;
        }
        matched.sort_unstable_by(|a, b| b.cmp(a));
        let candidate = matched[self.membership().quorum() - 1];
        // Only entries from the current term commit by counting replicas.
        if candidate > self.commit_index && self.log.term_at(candidate) == Some(self.term) {
            debug!(node_id = %self.id, commit_index = candidate, "advanced commit index");
            self.commit_index = candidate;
        }
    }

    fn broadcast_append(&mut self) {
        let peers: Vec<NodeId> = self.progress.keys().cloned().collect();
        for peer in peers {
            self.send_append(&peer);
        }
    }

    fn heartbeat(&mut self) {
        let peers: Vec<NodeId> = self.progress.keys().cloned().collect();
        for peer in peers {
            if let Some(p) = self.progress.get_mut(&peer) {
                match p.snapshot_wait {
                    Some(0) | None => p.snapshot_wait = None,
                    Some(n) => {
                        p.snapshot_wait = Some(n - 1);
                        continue;
                    }
                }
            }
            self.send_append(&peer);
        }
    }

    fn send_append(&mut self, peer: &str) {
        let Some(progress) = self.progress.get(peer).copied() else {
            return;
        };
        let next_index = progress.next_index.min(self.log.last_index() + 1);

        if next_index <= self.log.snapshot_index() {
            if progress.snapshot_wait.is_some() {
                return;
            }
            let Some(snapshot) = self.snapshot.clone() else {
                warn!(node_id = %self.id, %peer, "peer is behind the log but no snapshot is held");
                return;
            };
            info!(
                node_id = %self.id,
                %peer,
                index = snapshot.index,
                games = snapshot.games.len(),
                "sending snapshot"
            );
            if let Some(p) = self.progress.get_mut(peer) {
                p.snapshot_wait = Some(self.config.election_ticks);
            }
            self.send(
                peer.to_string(),
                Message::InstallSnapshot {
                    term: self.term,
                    snapshot,
                },
            );
            return;
        }

        let prev_log_index = next_index - 1;
        let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(0);
        let entries = self.log.entries_from(next_index, self.config.max_batch);
        self.send(
            peer.to_string(),
            Message::AppendEntries {
                term: self.term,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: self.commit_index,
            },
        );
    }

    fn handle_append_response(
        &mut self,
        from: NodeId,
        term: Term,
        success: bool,
        match_index: LogIndex,
    ) {
        if !self.is_leader() || term != self.term {
            return;
        }
        let last_index = self.log.last_index();
        let Some(p) = self.progress.get_mut(&from) else {
            return;
        };
        if success {
            p.match_index = p.match_index.max(match_index);
            p.next_index = p.match_index + 1;
            let behind = p.next_index <= last_index;
            self.maybe_commit();
            if behind {
                self.send_append(&from);
            }
        } else {
            p.next_index = p
                .next_index
                .saturating_sub(1)
                .min(match_index + 1)
                .max(1);
            self.send_append(&from);
        }
    }

    fn handle_snapshot_response(&mut self, from: NodeId, term: Term, last_index: LogIndex) {
        if !self.is_leader() || term != self.term {
            return;
        }
        let Some(p) = self.progress.get_mut(&from) else {
            return;
        };
        p.snapshot_wait = None;
        p.match_index = p.match_index.max(last_index);
        p.next_index = p.match_index + 1;
        info!(node_id = %self.id, peer = %from, last_index, "peer installed snapshot");
        self.maybe_commit();
        self.send_append(&from);
    }

    // ── Follower ─────────────────────────────────────────────────────────────

    fn handle_request_vote(
        &mut self,
        from: NodeId,
        term: Term,
        last_log_index: LogIndex,
        last_log_term: Term,
    ) {
        let free = self.voted_for.is_none() || self.voted_for.as_deref() == Some(from.as_str());
        let granted =
            term == self.term && free && self.log.is_up_to_date(last_log_index, last_log_term);
        if granted {
            self.voted_for = Some(from.clone());
            self.reset_election_timer();
            self.persist_hard_state();
        }
        debug!(node_id = %self.id, candidate = %from, term, granted, "vote");
        self.send(
            from,
            Message::Vote {
                term: self.term,
                granted,
            },
        );
    }

    fn handle_append(
        &mut self,
        from: NodeId,
        term: Term,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        mut entries: Vec<Entry>,
        leader_commit: LogIndex,
    ) {
        if term < self.term {
            self.send(
                from,
                Message::AppendResponse {
                    term: self.term,
                    success: false,
                    match_index: self.log.last_index(),
                },
            );
            return;
        }
        if self.role != Role::Follower {
            self.become_follower(term, Some(from.clone()));
        }
        self.leader = Some(from.clone());
        self.election_elapsed = 0;

        let snapshot_index = self.log.snapshot_index();
        let mut prev = prev_log_index;
        if prev < snapshot_index {
            // Everything through the snapshot is committed and matches.
            entries.retain(|e| e.index > snapshot_index);
            prev = snapshot_index;
        } else if self.log.term_at(prev) != Some(prev_log_term) {
            let hint = prev.saturating_sub(1).min(self.log.last_index());
            self.send(
                from,
                Message::AppendResponse {
                    term: self.term,
                    success: false,
                    match_index: hint,
                },
            );
            return;
        }

        let last_new = prev + entries.len() as LogIndex;
        let (truncated, appended) = self.log.merge(entries);
        if let Some(index) = truncated {
            debug!(node_id = %self.id, index, "truncated conflicting entries");
            self.log_ops.push(LogOp::TruncateFrom { index });
        }
        if !appended.is_empty() {
            self.log_ops.push(LogOp::Append { entries: appended });
        }
        if leader_commit > self.commit_index {
            self.commit_index = leader_commit.min(last_new).max(self.commit_index);
        }
        self.send(
            from,
            Message::AppendResponse {
                term: self.term,
                success: true,
                match_index: last_new,
            },
        );
    }

    fn handle_install_snapshot(&mut self, from: NodeId, term: Term, snapshot: ClusterSnapshot) {
        if term < self.term {
            self.send(
                from,
                Message::SnapshotResponse {
                    term: self.term,
                    last_index: self.log.last_index(),
                },
            );
            return;
        }
        if self.role != Role::Follower {
            self.become_follower(term, Some(from.clone()));
        }
        self.leader = Some(from.clone());
        self.election_elapsed = 0;

        if snapshot.index <= self.commit_index {
            self.send(
                from,
                Message::SnapshotResponse {
                    term: self.term,
                    last_index: self.commit_index,
                },
            );
            return;
        }

        info!(
            node_id = %self.id,
            index = snapshot.index,
            games = snapshot.games.len(),
            "installing snapshot"
        );
        let effects = self.machine.restore(&snapshot);
        self.log.reset(snapshot.index, snapshot.term);
        self.commit_index = snapshot.index;
        self.last_applied = snapshot.index;
        self.log_ops.push(LogOp::TruncateFrom {
            index: snapshot.index + 1,
        });
        self.log_ops.push(LogOp::Snapshot {
            snapshot: snapshot.clone(),
        });
        self.applied.push(Applied {
            index: snapshot.index,
            term: snapshot.term,
            output: CommandOutput::Done,
            effects,
        });
        let last_index = snapshot.index;
        self.snapshot = Some(snapshot);
        self.send(
            from,
            Message::SnapshotResponse {
                term: self.term,
                last_index,
            },
        );
    }

    // ── Apply ────────────────────────────────────────────────────────────────

    fn apply_ready(&mut self) {
        while self.last_applied < self.commit_index {
            let index = self.last_applied + 1;
            let Some(entry) = self.log.get(index).cloned() else {
                break;
            };
            let was_member = self.membership().contains(&self.id);
            let (output, effects) = self.machine.apply(&entry.command);
            self.last_applied = index;
            if matches!(
                entry.command,
                Command::AddLearner { .. } | Command::PromoteVoter { .. } | Command::RemoveNode { .. }
            ) {
                self.on_membership_change(was_member);
            }
            self.applied.push(Applied {
                index,
                term: entry.term,
                output,
                effects,
            });
        }
        self.maybe_compact();
    }

    fn on_membership_change(&mut self, was_member: bool) {
        if was_member && !self.membership().contains(&self.id) {
            warn!(node_id = %self.id, "this node was removed from the cluster");
            if self.is_leader() {
                self.become_follower(self.term, None);
            }
            return;
        }
        if self.is_leader() {
            self.sync_progress();
            self.maybe_commit();
            self.broadcast_append();
        }
    }

    fn maybe_compact(&mut self) {
        let retain = self.config.retain_log_entries;
        if retain == 0 || self.last_applied < self.log.snapshot_index() + retain {
            return;
        }
        let index = self.last_applied;
        let Some(term) = self.log.term_at(index) else {
            return;
        };
        let snapshot = self.machine.snapshot(index, term);
        self.log.compact(index, term);
        self.log_ops.push(LogOp::Snapshot {
            snapshot: snapshot.clone(),
        });
        self.snapshot = Some(snapshot);
        debug!(node_id = %self.id, index, "compacted log into snapshot");
    }

    // ── Output ───────────────────────────────────────────────────────────────

    fn send(&mut self, to: NodeId, message: Message) {
        self.outbox.push(Envelope {
            from: self.id.clone(),
            from_addr: self.addr.clone(),
            to,
            message,
        });
    }

    fn persist_hard_state(&mut self) {
        self.log_ops.push(LogOp::HardState {
            term: self.term,
            voted_for: self.voted_for.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(id: &str) -> RaftCore {
        let machine = GameMachine::seeded(vec![], vec![], Membership::single(id, "a:1", "k"));
        let mut core = RaftCore::new(id, "a:1", RaftConfig::default(), machine);
        core.bootstrap();
        core
    }

    #[test]
    fn bootstrap_node_leads_and_commits_alone() {
        let mut core = single("a");
        assert!(core.is_leader());
        assert_eq!(core.term(), 2);
        // Noop from the new term committed at once.
        assert_eq!(core.commit_index(), 2);

        let (index, _) = core.propose(Command::Noop).unwrap();
        assert_eq!(index, 3);
        assert_eq!(core.last_applied(), 3);
        let applied = core.take_applied();
        assert_eq!(applied.last().map(|a| a.index), Some(3));
        assert!(core.take_outbox().is_empty());
    }

    #[test]
    fn bootstrap_persists_snapshot_and_hard_state() {
        let mut core = single("a");
        let ops = core.take_log_ops();
        assert!(matches!(ops.first(), Some(LogOp::Snapshot { snapshot }) if snapshot.index == 1));
        assert!(ops.iter().any(|op| matches!(op, LogOp::HardState { term: 2, .. })));
        assert!(ops.iter().any(|op| matches!(op, LogOp::Append { .. })));
    }

    #[test]
    fn follower_refuses_proposals_and_names_leader() {
        let mut core = RaftCore::new("b", "b:1", RaftConfig::default(), GameMachine::new());
        core.step(Envelope {
            from: "a".into(),
            from_addr: "a:1".into(),
            to: "b".into(),
            message: Message::AppendEntries {
                term: 3,
                prev_log_index: 0,
                prev_log_term: 0,
                entries: vec![],
                leader_commit: 0,
            },
        });
        let err = core.propose(Command::Noop).unwrap_err();
        assert_eq!(err.leader_id.as_deref(), Some("a"));
        assert_eq!(err.leader_addr.as_deref(), Some("a:1"));
        assert_eq!(core.term(), 3);
    }

    #[test]
    fn non_member_never_campaigns() {
        let mut core = RaftCore::new("b", "b:1", RaftConfig::default(), GameMachine::new());
        for _ in 0..100 {
            core.tick();
        }
        assert_eq!(core.role(), Role::Follower);
        assert_eq!(core.term(), 0);
    }

    #[test]
    fn compaction_keeps_state_and_shrinks_log() {
        let config = RaftConfig {
            retain_log_entries: 4,
            ..RaftConfig::default()
        };
        let machine = GameMachine::seeded(vec![], vec![], Membership::single("a", "a:1", "k"));
        let mut core = RaftCore::new("a", "a:1", config, machine);
        core.bootstrap();
        for _ in 0..10 {
            core.propose(Command::Noop).unwrap();
        }
        assert!(core.snapshot_index() > 1);
        assert_eq!(core.last_index(), core.last_applied());
        assert!(core
            .take_log_ops()
            .iter()
            .any(|op| matches!(op, LogOp::Snapshot { snapshot } if snapshot.index > 1)));
    }

    #[test]
    fn restore_resumes_from_persisted_snapshot() {
        let mut core = single("a");
        core.propose(Command::Noop).unwrap();
        let mut persisted = PersistedLog::default();
        for op in core.take_log_ops() {
            persisted.apply(op);
        }
        let restored = RaftCore::restore("a", "a:1", RaftConfig::default(), persisted);
        assert_eq!(restored.term(), 2);
        assert_eq!(restored.last_index(), 3);
        assert_eq!(restored.commit_index(), 1);
        assert_eq!(restored.role(), Role::Follower);
        assert!(restored.membership().is_voter("a"));
    }
}
