//! Commands carried by the replicated log.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use scorebook_model::{Action, Game, GameId, Revision, TeamRecord};
use scorebook_sync::AppendAck;

pub type NodeId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Written by every new leader to commit entries from earlier terms.
    Noop,
    CreateGame {
        game: Game,
    },
    AppendActions {
        game_id: GameId,
        #[serde(default)]
        expected_revision: Option<Revision>,
        actions: Vec<Action>,
    },
    OverwriteLog {
        game: Game,
    },
    DeleteGame {
        game_id: GameId,
    },
    PutTeam {
        team: TeamRecord,
    },
    AddLearner {
        node_id: NodeId,
        addr: String,
        public_key: String,
        #[serde(default)]
        non_voter: bool,
    },
    PromoteVoter {
        node_id: NodeId,
    },
    RemoveNode {
        node_id: NodeId,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Noop => "noop",
            Command::CreateGame { .. } => "create_game",
            Command::AppendActions { .. } => "append_actions",
            Command::OverwriteLog { .. } => "overwrite_log",
            Command::DeleteGame { .. } => "delete_game",
            Command::PutTeam { .. } => "put_team",
            Command::AddLearner { .. } => "add_learner",
            Command::PromoteVoter { .. } => "promote_voter",
            Command::RemoveNode { .. } => "remove_node",
        }
    }
}

/// Result of applying one command, identical on every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    Ack(AppendAck),
    Conflict {
        message: String,
        revision: Option<Revision>,
    },
    NotFound(String),
    Done,
}

/// Side effects the runtime writes through to the local game store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    PutGame(Game),
    DeleteGame(GameId),
    PutTeam(TeamRecord),
}

// ──────────────────────────────────────────────
// Membership
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub addr: String,
    pub public_key: String,
    pub voter: bool,
    /// Never promoted to voter.
    #[serde(default)]
    pub non_voter: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub nodes: BTreeMap<NodeId, Member>,
}

impl Membership {
    pub fn single(node_id: &str, addr: &str, public_key: &str) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            node_id.to_string(),
            Member {
                addr: addr.to_string(),
                public_key: public_key.to_string(),
                voter: true,
                non_voter: false,
            },
        );
        Membership { nodes }
    }

    pub fn voters(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter().filter(|(_, m)| m.voter).map(|(id, _)| id)
    }

    pub fn learners(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter().filter(|(_, m)| !m.voter).map(|(id, _)| id)
    }

    pub fn is_voter(&self, id: &str) -> bool {
        self.nodes.get(id).is_some_and(|m| m.voter)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn addr(&self, id: &str) -> Option<&str> {
        self.nodes.get(id).map(|m| m.addr.as_str())
    }

    /// Votes needed for a majority of the voters.
    pub fn quorum(&self) -> usize {
        self.voters().count() / 2 + 1
    }
}
