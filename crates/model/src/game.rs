use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::action::{Action, ActionId, Team};
use crate::error::ModelError;

pub type GameId = Uuid;

/// Monotonic counter assigned by the cluster leader to each committed batch
/// of actions for one game. Zero means "never committed".
pub type Revision = u64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
}

impl Player {
    pub fn named(name: &str) -> Self {
        Player {
            name: name.to_string(),
            number: None,
        }
    }
}

/// One substitution applied to a lineup slot during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionRecord {
    pub action_id: ActionId,
    pub inning: u32,
    pub outgoing: Player,
    pub incoming: Player,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

/// A batting-order slot: the starter, whoever bats there now, and the
/// substitutions in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterSlot {
    pub starter: Player,
    pub current: Player,
    #[serde(default)]
    pub history: Vec<SubstitutionRecord>,
}

impl RosterSlot {
    pub fn new(starter: Player) -> Self {
        RosterSlot {
            current: starter.clone(),
            starter,
            history: Vec::new(),
        }
    }

    /// Back to the starter, history cleared.
    pub fn reset(&mut self) {
        self.current = self.starter.clone();
        self.history.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineup {
    pub name: String,
    #[serde(default)]
    pub slots: Vec<RosterSlot>,
}

impl Lineup {
    pub fn new(name: &str, players: &[&str]) -> Self {
        Lineup {
            name: name.to_string(),
            slots: players
                .iter()
                .map(|p| RosterSlot::new(Player::named(p)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    pub away: Lineup,
    pub home: Lineup,
}

impl Roster {
    pub fn side(&self, team: Team) -> &Lineup {
        match team {
            Team::Away => &self.away,
            Team::Home => &self.home,
        }
    }

    pub fn side_mut(&mut self, team: Team) -> &mut Lineup {
        match team {
            Team::Away => &mut self.away,
            Team::Home => &mut self.home,
        }
    }

    /// Copy with every slot reset to its starter.
    pub fn at_start(&self) -> Roster {
        let mut roster = self.clone();
        for slot in roster
            .away
            .slots
            .iter_mut()
            .chain(roster.home.slots.iter_mut())
        {
            slot.reset();
        }
        roster
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rules {
    pub innings: u32,
    pub outs_per_inning: u8,
}

impl Default for Rules {
    fn default() -> Self {
        Rules {
            innings: 9,
            outs_per_inning: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    #[default]
    Scheduled,
    InProgress,
    Final,
}

/// A game: header plus its append-only action log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub roster: Roster,
    #[serde(default)]
    pub rules: Rules,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub revision: Revision,
    #[serde(default)]
    pub created_at: String,
}

/// Everything about a game except its log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameHeader {
    pub id: GameId,
    pub roster: Roster,
    #[serde(default)]
    pub rules: Rules,
    #[serde(default)]
    pub revision: Revision,
    #[serde(default)]
    pub created_at: String,
}

impl Game {
    pub fn new(id: GameId, away: Lineup, home: Lineup, rules: Rules) -> Self {
        Game {
            id,
            roster: Roster { away, home },
            rules,
            actions: Vec::new(),
            revision: 0,
            created_at: crate::now_rfc3339(),
        }
    }

    pub fn from_header(header: GameHeader, actions: Vec<Action>) -> Self {
        Game {
            id: header.id,
            roster: header.roster,
            rules: header.rules,
            actions,
            revision: header.revision,
            created_at: header.created_at,
        }
    }

    pub fn header(&self) -> GameHeader {
        GameHeader {
            id: self.id,
            roster: self.roster.clone(),
            rules: self.rules,
            revision: self.revision,
            created_at: self.created_at.clone(),
        }
    }

    pub fn contains_action(&self, id: &ActionId) -> bool {
        self.actions.iter().any(|a| &a.id == id)
    }

    /// Append one action. The log never reorders or drops entries; the only
    /// refusal is a repeated id.
    pub fn append(&mut self, action: Action) -> Result<(), ModelError> {
        if self.contains_action(&action.id) {
            return Err(ModelError::DuplicateAction(action.id));
        }
        self.actions.push(action);
        Ok(())
    }

    /// Append a batch atomically: either every action lands or none does.
    pub fn append_all(&mut self, actions: Vec<Action>) -> Result<(), ModelError> {
        let mut seen: HashSet<ActionId> = self.actions.iter().map(|a| a.id).collect();
        for a in &actions {
            if !seen.insert(a.id) {
                return Err(ModelError::DuplicateAction(a.id));
            }
        }
        self.actions.extend(actions);
        Ok(())
    }

    /// Same header under a new identity, carrying the given log.
    pub fn fork(&self, new_id: GameId, actions: Vec<Action>) -> Game {
        Game {
            id: new_id,
            roster: self.roster.clone(),
            rules: self.rules,
            actions,
            revision: 0,
            created_at: crate::now_rfc3339(),
        }
    }
}

/// SHA-256 over the canonical JSON of each action in order, hex encoded.
///
/// Two logs with equal digests hold the same actions in the same order.
pub fn log_digest(actions: &[Action]) -> String {
    let mut hasher = Sha256::new();
    for action in actions {
        // Struct field order is fixed, so the encoding is stable.
        let bytes = serde_json::to_vec(action).unwrap_or_default();
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(&bytes);
    }
    format!("{:x}", hasher.finalize())
}

/// A team's standing roster, stored alongside games.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub players: Vec<Player>,
}
