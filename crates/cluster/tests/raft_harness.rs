//! Consensus scenarios driven by a deterministic message pump: no timers, no
//! sockets, every message delivered in order unless its endpoint is down.

use std::collections::{BTreeMap, BTreeSet};

use scorebook_cluster::raft::{RaftCore, Role};
use scorebook_cluster::{Command, GameMachine, Membership, RaftConfig};
use scorebook_model::{
    Action, ActionKind, ActiveContext, Game, GameId, Lineup, PitchKind, PitchPayload, Rules, Team,
};
use uuid::Uuid;

struct Harness {
    nodes: BTreeMap<String, RaftCore>,
    down: BTreeSet<String>,
    config: RaftConfig,
}

impl Harness {
    fn bootstrap(config: RaftConfig) -> Self {
        let machine = GameMachine::seeded(vec![], vec![], Membership::single("a", "a", "key-a"));
        let mut a = RaftCore::new("a", "a", config, machine);
        a.bootstrap();
        let mut nodes = BTreeMap::new();
        nodes.insert("a".to_string(), a);
        let mut h = Harness {
            nodes,
            down: BTreeSet::new(),
            config,
        };
        h.pump();
        h
    }

    /// Three voters: a bootstraps, b and c join and are promoted.
    fn three(config: RaftConfig) -> Self {
        let mut h = Self::bootstrap(config);
        h.add("b", false);
        h.add("c", false);
        h.promote_caught_up();
        h.settle();
        h
    }

    fn core(&self, id: &str) -> &RaftCore {
        &self.nodes[id]
    }

    fn core_mut(&mut self, id: &str) -> &mut RaftCore {
        self.nodes.get_mut(id).unwrap()
    }

    fn add(&mut self, id: &str, non_voter: bool) {
        self.nodes.insert(
            id.to_string(),
            RaftCore::new(id, id, self.config, GameMachine::new()),
        );
        let leader = self.leader().unwrap();
        self.core_mut(&leader)
            .propose(Command::AddLearner {
                node_id: id.to_string(),
                addr: id.to_string(),
                public_key: format!("key-{id}"),
                non_voter,
            })
            .unwrap();
        self.pump();
    }

    fn promote_caught_up(&mut self) {
        let leader = self.leader().unwrap();
        let caught_up = self.core(&leader).learners_caught_up();
        for learner in caught_up {
            self.core_mut(&leader)
                .propose(Command::PromoteVoter { node_id: learner })
                .unwrap();
            self.pump();
        }
    }

    /// The live leader with the highest term.
    fn leader(&self) -> Option<String> {
        self.nodes
            .iter()
            .filter(|(id, core)| !self.down.contains(*id) && core.is_leader())
            .max_by_key(|(_, core)| core.term())
            .map(|(id, _)| id.clone())
    }

    fn pump(&mut self) {
        for _ in 0..10_000 {
            let mut batch = Vec::new();
            for (id, core) in self.nodes.iter_mut() {
                core.take_log_ops();
                core.take_applied();
                let out = core.take_outbox();
                if !self.down.contains(id) {
                    batch.extend(out);
                }
            }
            if batch.is_empty() {
                return;
            }
            for envelope in batch {
                if self.down.contains(&envelope.to) {
                    continue;
                }
                if let Some(core) = self.nodes.get_mut(&envelope.to) {
                    core.step(envelope);
                }
            }
        }
        panic!("message pump did not settle");
    }

    fn tick(&mut self, rounds: usize) {
        for _ in 0..rounds {
            for (id, core) in self.nodes.iter_mut() {
                if !self.down.contains(id) {
                    core.tick();
                }
            }
            self.pump();
        }
    }

    /// Run heartbeats until followers have learned the leader's commit index.
    fn settle(&mut self) {
        self.tick(self.config.heartbeat_ticks as usize + 1);
    }

    fn propose(&mut self, command: Command) {
        let leader = self.leader().unwrap();
        self.core_mut(&leader).propose(command).unwrap();
        self.pump();
        self.settle();
    }
}

fn new_game() -> Game {
    Game::new(
        Uuid::new_v4(),
        Lineup::new("Owls", &["Ada", "Bo"]),
        Lineup::new("Hawks", &["Cy", "Di"]),
        Rules::default(),
    )
}

fn pitch(kind: PitchKind) -> Action {
    Action::new(ActionKind::Pitch(PitchPayload {
        ctx: ActiveContext::new(1, Team::Away, 0, 1),
        pitch: kind,
    }))
}

fn append(game_id: GameId, kind: PitchKind) -> Command {
    Command::AppendActions {
        game_id,
        expected_revision: None,
        actions: vec![pitch(kind)],
    }
}

fn log_len(core: &RaftCore, id: &GameId) -> Option<usize> {
    core.machine().game(id).map(|g| g.actions.len())
}

#[test]
fn joiners_catch_up_and_become_voters() {
    let h = Harness::three(RaftConfig::default());
    let membership = h.core("a").membership();
    assert_eq!(membership.voters().count(), 3);
    assert_eq!(membership.learners().count(), 0);
    assert_eq!(membership.quorum(), 2);
    for id in ["b", "c"] {
        assert_eq!(h.core(id).role(), Role::Follower);
        assert_eq!(h.core(id).leader_id(), Some("a"));
        assert_eq!(h.core(id).commit_index(), h.core("a").commit_index());
        assert!(h.core(id).membership().is_voter(id));
    }
}

#[test]
fn committed_writes_reach_every_replica() {
    let mut h = Harness::three(RaftConfig::default());
    let game = new_game();
    let id = game.id;
    h.propose(Command::CreateGame { game });
    h.propose(append(id, PitchKind::Ball));
    h.propose(append(id, PitchKind::Strike));

    for node in ["a", "b", "c"] {
        let replica = h.core(node).machine().game(&id).unwrap();
        assert_eq!(replica.actions.len(), 2, "node {node}");
        assert_eq!(replica.revision, 3, "node {node}");
    }
}

#[test]
fn write_without_quorum_does_not_commit() {
    let mut h = Harness::three(RaftConfig::default());
    let game = new_game();
    let id = game.id;
    h.propose(Command::CreateGame { game });
    let committed = h.core("a").commit_index();

    h.down.insert("b".into());
    h.down.insert("c".into());
    h.propose(append(id, PitchKind::Ball));
    assert_eq!(h.core("a").commit_index(), committed);
    assert_eq!(log_len(h.core("a"), &id), Some(0));

    h.down.clear();
    h.tick(5);
    assert_eq!(log_len(h.core("a"), &id), Some(1));
    assert_eq!(log_len(h.core("c"), &id), Some(1));
}

#[test]
fn leader_crash_triggers_reelection() {
    let mut h = Harness::three(RaftConfig::default());
    let game = new_game();
    let id = game.id;
    h.propose(Command::CreateGame { game });
    let old_term = h.core("a").term();

    h.down.insert("a".into());
    h.tick(60);
    let leader = h.leader().expect("a new leader is elected");
    assert_ne!(leader, "a");
    assert!(h.core(&leader).term() > old_term);

    h.propose(append(id, PitchKind::Foul));
    assert_eq!(log_len(h.core("b"), &id), Some(1));
    assert_eq!(log_len(h.core("c"), &id), Some(1));

    // The old leader rejoins, steps down, and catches up.
    h.down.remove("a");
    h.tick(10);
    assert_eq!(h.core("a").role(), Role::Follower);
    assert_eq!(h.core("a").leader_id(), Some(leader.as_str()));
    assert_eq!(log_len(h.core("a"), &id), Some(1));
}

#[test]
fn uncommitted_entries_of_a_deposed_leader_are_discarded() {
    let mut h = Harness::three(RaftConfig::default());
    let game = new_game();
    let id = game.id;
    h.propose(Command::CreateGame { game });

    // a is cut off and accepts a write it can never commit.
    h.down.insert("a".into());
    h.core_mut("a").propose(append(id, PitchKind::Ball)).unwrap();
    h.tick(60);
    h.propose(append(id, PitchKind::Strike));

    h.down.remove("a");
    h.tick(10);
    let on_a = h.core("a").machine().game(&id).unwrap();
    let on_b = h.core("b").machine().game(&id).unwrap();
    assert_eq!(on_a.actions, on_b.actions);
    assert_eq!(on_a.actions.len(), 1);
    assert!(matches!(
        &on_a.actions[0].kind,
        ActionKind::Pitch(p) if p.pitch == PitchKind::Strike
    ));
}

#[test]
fn lagging_follower_catches_up_from_snapshot() {
    let config = RaftConfig {
        retain_log_entries: 5,
        ..RaftConfig::default()
    };
    let mut h = Harness::three(config);
    let game = new_game();
    let id = game.id;
    h.propose(Command::CreateGame { game });

    h.down.insert("c".into());
    for _ in 0..20 {
        h.propose(append(id, PitchKind::Ball));
    }
    let snapshot_index = h.core("a").snapshot_index();
    assert!(snapshot_index > h.core("c").last_index());

    h.down.remove("c");
    h.tick(120);
    h.settle();
    let leader = h.leader().unwrap();
    assert!(h.core("c").snapshot_index() >= snapshot_index);
    assert_eq!(log_len(h.core("c"), &id), Some(20));
    assert_eq!(h.core("c").commit_index(), h.core(&leader).commit_index());
}

#[test]
fn non_voting_learner_is_never_promoted() {
    let mut h = Harness::bootstrap(RaftConfig::default());
    h.add("scoreboard", true);
    assert!(h.core("a").learners_caught_up().is_empty());
    assert!(!h.core("a").membership().is_voter("scoreboard"));
    assert_eq!(
        h.core("scoreboard").commit_index(),
        h.core("a").commit_index()
    );

    // Learners do not count toward quorum: the single voter still commits.
    let game = new_game();
    let id = game.id;
    h.propose(Command::CreateGame { game });
    assert!(h.core("scoreboard").machine().game(&id).is_some());
}

#[test]
fn learner_never_starts_an_election() {
    let mut h = Harness::bootstrap(RaftConfig::default());
    h.add("b", false);
    h.down.insert("a".into());
    h.tick(100);
    assert_eq!(h.core("b").role(), Role::Follower);
    assert!(h.leader().is_none());
}

#[test]
fn removed_voter_leaves_quorum() {
    let mut h = Harness::three(RaftConfig::default());
    h.propose(Command::RemoveNode {
        node_id: "c".into(),
    });
    let membership = h.core("a").membership();
    assert!(!membership.contains("c"));
    assert_eq!(membership.quorum(), 2);

    h.down.insert("c".into());
    let game = new_game();
    let id = game.id;
    h.propose(Command::CreateGame { game });
    assert!(h.core("b").machine().game(&id).is_some());
}
