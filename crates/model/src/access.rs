//! Access policy interface.
//!
//! Authentication lives outside this system; an external provider supplies
//! per-game `{isPublic, collaborators}` records and this module turns them
//! into an access decision for a principal.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::game::GameId;

/// What a principal may do with a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Access {
    None,
    Read,
    Append,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamePermissions {
    #[serde(default)]
    pub is_public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub collaborators: Vec<String>,
}

impl GamePermissions {
    pub fn access_for(&self, principal: Option<&str>) -> Access {
        if let Some(p) = principal {
            if self.owner.as_deref() == Some(p) || self.collaborators.iter().any(|c| c == p) {
                return Access::Append;
            }
        }
        if self.is_public {
            Access::Read
        } else {
            Access::None
        }
    }
}

pub trait AccessPolicy: Send + Sync + 'static {
    fn access(&self, game_id: &GameId, principal: Option<&str>) -> Access;
}

/// Everyone may append to everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAccess;

impl AccessPolicy for OpenAccess {
    fn access(&self, _game_id: &GameId, _principal: Option<&str>) -> Access {
        Access::Append
    }
}

/// Permissions pushed in by the external provider. Games without an entry
/// fall back to `default`.
#[derive(Debug)]
pub struct PermissionTable {
    entries: RwLock<HashMap<GameId, GamePermissions>>,
    default: Access,
}

impl PermissionTable {
    pub fn new(default: Access) -> Self {
        PermissionTable {
            entries: RwLock::new(HashMap::new()),
            default,
        }
    }

    pub fn set(&self, game_id: GameId, permissions: GamePermissions) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(game_id, permissions);
        }
    }
}

impl AccessPolicy for PermissionTable {
    fn access(&self, game_id: &GameId, principal: Option<&str>) -> Access {
        match self.entries.read() {
            Ok(entries) => entries
                .get(game_id)
                .map(|p| p.access_for(principal))
                .unwrap_or(self.default),
            Err(_) => Access::None,
        }
    }
}
