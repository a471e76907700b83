//! Replicated state machine: every game's committed log, team records, and
//! cluster membership.
//!
//! `apply` is a pure function of the current state and the command, so all
//! nodes that apply the same log prefix hold the same state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use scorebook_model::{Game, GameId, TeamRecord};
use scorebook_sync::{authority, SyncError};
use uuid::Uuid;

use crate::command::{Command, CommandOutput, Effect, Member, Membership};
use crate::raft::{LogIndex, Term};

/// Full state at one log position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub index: LogIndex,
    pub term: Term,
    pub games: Vec<Game>,
    pub teams: Vec<TeamRecord>,
    pub membership: Membership,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameMachine {
    games: BTreeMap<GameId, Game>,
    teams: BTreeMap<Uuid, TeamRecord>,
    membership: Membership,
}

impl GameMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed state from games and teams that existed before the cluster.
    pub fn seeded(games: Vec<Game>, teams: Vec<TeamRecord>, membership: Membership) -> Self {
        GameMachine {
            games: games.into_iter().map(|g| (g.id, g)).collect(),
            teams: teams.into_iter().map(|t| (t.id, t)).collect(),
            membership,
        }
    }

    pub fn game(&self, id: &GameId) -> Option<&Game> {
        self.games.get(id)
    }

    pub fn games(&self) -> impl Iterator<Item = &Game> {
        self.games.values()
    }

    pub fn team(&self, id: &Uuid) -> Option<&TeamRecord> {
        self.teams.get(id)
    }

    pub fn teams(&self) -> impl Iterator<Item = &TeamRecord> {
        self.teams.values()
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn apply(&mut self, command: &Command) -> (CommandOutput, Vec<Effect>) {
        match command {
            Command::Noop => (CommandOutput::Done, Vec::new()),

            Command::CreateGame { game } => {
                match authority::admit_new(self.games.get(&game.id), game.clone()) {
                    Ok(admitted) => {
                        let ack = authority::ack(&admitted, false);
                        self.games.insert(admitted.id, admitted.clone());
                        (CommandOutput::Ack(ack), vec![Effect::PutGame(admitted)])
                    }
                    Err(e) => (rejected(e), Vec::new()),
                }
            }

            Command::AppendActions {
                game_id,
                expected_revision,
                actions,
            } => {
                let Some(game) = self.games.get_mut(game_id) else {
                    return (
                        CommandOutput::NotFound(format!("game {game_id}")),
                        Vec::new(),
                    );
                };
                let before = game.revision;
                match authority::apply_append(game, *expected_revision, actions.clone()) {
                    Ok(ack) if ack.revision != before => {
                        (CommandOutput::Ack(ack), vec![Effect::PutGame(game.clone())])
                    }
                    Ok(ack) => (CommandOutput::Ack(ack), Vec::new()),
                    Err(e) => (rejected(e), Vec::new()),
                }
            }

            Command::OverwriteLog { game: incoming } => {
                let Some(game) = self.games.get_mut(&incoming.id) else {
                    return (
                        CommandOutput::NotFound(format!("game {}", incoming.id)),
                        Vec::new(),
                    );
                };
                match authority::apply_overwrite(game, incoming.clone()) {
                    Ok(ack) => (CommandOutput::Ack(ack), vec![Effect::PutGame(game.clone())]),
                    Err(e) => (rejected(e), Vec::new()),
                }
            }

            Command::DeleteGame { game_id } => match self.games.remove(game_id) {
                Some(_) => (CommandOutput::Done, vec![Effect::DeleteGame(*game_id)]),
                None => (
                    CommandOutput::NotFound(format!("game {game_id}")),
                    Vec::new(),
                ),
            },

            Command::PutTeam { team } => {
                self.teams.insert(team.id, team.clone());
                (CommandOutput::Done, vec![Effect::PutTeam(team.clone())])
            }

            Command::AddLearner {
                node_id,
                addr,
                public_key,
                non_voter,
            } => {
                let voter = self.membership.is_voter(node_id);
                info!(%node_id, %addr, voter, "membership: node added");
                self.membership.nodes.insert(
                    node_id.clone(),
                    Member {
                        addr: addr.clone(),
                        public_key: public_key.clone(),
                        voter,
                        non_voter: *non_voter,
                    },
                );
                (CommandOutput::Done, Vec::new())
            }

            Command::PromoteVoter { node_id } => match self.membership.nodes.get_mut(node_id) {
                Some(member) if !member.non_voter => {
                    if !member.voter {
                        info!(%node_id, "membership: promoted to voter");
                    }
                    member.voter = true;
                    (CommandOutput::Done, Vec::new())
                }
                Some(_) => (
                    CommandOutput::Conflict {
                        message: format!("node {node_id} joined as a non-voter"),
                        revision: None,
                    },
                    Vec::new(),
                ),
                None => (
                    CommandOutput::NotFound(format!("node {node_id}")),
                    Vec::new(),
                ),
            },

            Command::RemoveNode { node_id } => {
                let remaining_voters = self
                    .membership
                    .voters()
                    .filter(|id| *id != node_id)
                    .count();
                if remaining_voters == 0 {
                    return (
                        CommandOutput::Conflict {
                            message: "cannot remove the last voter".to_string(),
                            revision: None,
                        },
                        Vec::new(),
                    );
                }
                match self.membership.nodes.remove(node_id) {
                    Some(_) => {
                        info!(%node_id, "membership: node removed");
                        (CommandOutput::Done, Vec::new())
                    }
                    None => (
                        CommandOutput::NotFound(format!("node {node_id}")),
                        Vec::new(),
                    ),
                }
            }
        }
    }

    pub fn snapshot(&self, index: LogIndex, term: Term) -> ClusterSnapshot {
        ClusterSnapshot {
            index,
            term,
            games: self.games.values().cloned().collect(),
            teams: self.teams.values().cloned().collect(),
            membership: self.membership.clone(),
        }
    }

    /// Replace all state with `snapshot`. Returns the store writes that bring
    /// a local store holding the previous state in line with it.
    pub fn restore(&mut self, snapshot: &ClusterSnapshot) -> Vec<Effect> {
        let mut effects: Vec<Effect> = self
            .games
            .keys()
            .filter(|id| !snapshot.games.iter().any(|g| &g.id == *id))
            .map(|id| Effect::DeleteGame(*id))
            .collect();
        effects.extend(snapshot.games.iter().cloned().map(Effect::PutGame));
        effects.extend(snapshot.teams.iter().cloned().map(Effect::PutTeam));

        self.games = snapshot.games.iter().map(|g| (g.id, g.clone())).collect();
        self.teams = snapshot.teams.iter().map(|t| (t.id, t.clone())).collect();
        self.membership = snapshot.membership.clone();
        effects
    }
}

fn rejected(e: SyncError) -> CommandOutput {
    match e {
        SyncError::Conflict {
            message,
            server_revision,
        } => CommandOutput::Conflict {
            message,
            revision: server_revision,
        },
        SyncError::NotFound(what) => CommandOutput::NotFound(what),
        other => CommandOutput::Conflict {
            message: other.to_string(),
            revision: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorebook_model::{
        Action, ActionKind, ActiveContext, Lineup, PitchKind, PitchPayload, Rules, Team,
    };

    fn game() -> Game {
        Game::new(
            Uuid::new_v4(),
            Lineup::new("Owls", &["Ada"]),
            Lineup::new("Hawks", &["Cy"]),
            Rules::default(),
        )
    }

    fn ball() -> Action {
        Action::new(ActionKind::Pitch(PitchPayload {
            ctx: ActiveContext::new(1, Team::Away, 0, 1),
            pitch: PitchKind::Ball,
        }))
    }

    #[test]
    fn append_checks_revision_at_apply_time() {
        let mut m = GameMachine::new();
        let g = game();
        let id = g.id;
        m.apply(&Command::CreateGame { game: g });

        let append = |rev| Command::AppendActions {
            game_id: id,
            expected_revision: Some(rev),
            actions: vec![ball()],
        };
        let (first, effects) = m.apply(&append(1));
        assert!(matches!(first, CommandOutput::Ack(ref a) if a.revision == 2));
        assert_eq!(effects.len(), 1);

        // Two clients raced on revision 1; the second loses.
        let (second, effects) = m.apply(&append(1));
        assert!(matches!(
            second,
            CommandOutput::Conflict {
                revision: Some(2),
                ..
            }
        ));
        assert!(effects.is_empty());
    }

    #[test]
    fn duplicate_batch_writes_nothing() {
        let mut m = GameMachine::new();
        let g = game();
        let id = g.id;
        m.apply(&Command::CreateGame { game: g });
        let cmd = Command::AppendActions {
            game_id: id,
            expected_revision: Some(1),
            actions: vec![ball()],
        };
        m.apply(&cmd);
        let (out, effects) = m.apply(&cmd);
        assert!(matches!(out, CommandOutput::Ack(ref a) if a.duplicate));
        assert!(effects.is_empty());
    }

    #[test]
    fn learner_promotion_respects_non_voter() {
        let mut m = GameMachine::seeded(vec![], vec![], Membership::single("a", "a:1", "ka"));
        m.apply(&Command::AddLearner {
            node_id: "b".into(),
            addr: "b:1".into(),
            public_key: "kb".into(),
            non_voter: false,
        });
        m.apply(&Command::AddLearner {
            node_id: "c".into(),
            addr: "c:1".into(),
            public_key: "kc".into(),
            non_voter: true,
        });
        assert_eq!(m.membership().quorum(), 1);

        m.apply(&Command::PromoteVoter { node_id: "b".into() });
        let (out, _) = m.apply(&Command::PromoteVoter { node_id: "c".into() });
        assert!(matches!(out, CommandOutput::Conflict { .. }));
        assert_eq!(m.membership().voters().count(), 2);
        assert_eq!(m.membership().quorum(), 2);
    }

    #[test]
    fn last_voter_cannot_be_removed() {
        let mut m = GameMachine::seeded(vec![], vec![], Membership::single("a", "a:1", "ka"));
        let (out, _) = m.apply(&Command::RemoveNode { node_id: "a".into() });
        assert!(matches!(out, CommandOutput::Conflict { .. }));
        assert!(m.membership().contains("a"));
    }

    #[test]
    fn restore_reports_deleted_games() {
        let mut old = GameMachine::new();
        let stale = game();
        let stale_id = stale.id;
        old.apply(&Command::CreateGame { game: stale });

        let mut source = GameMachine::new();
        source.apply(&Command::CreateGame { game: game() });
        let snapshot = source.snapshot(7, 2);

        let effects = old.restore(&snapshot);
        assert!(effects.contains(&Effect::DeleteGame(stale_id)));
        assert_eq!(old.games().count(), 1);
        assert!(old.game(&stale_id).is_none());
    }
}
