//! Sync wire protocol.
//!
//! | Method | Path | Body | Reply |
//! |---|---|---|---|
//! | `POST` | `/games` | [`CreateRequest`] | [`AppendAck`] |
//! | `GET` | `/games` | | `Vec<GameHeader>` |
//! | `GET` | `/games/{id}` | | `Game` |
//! | `PUT` | `/games/{id}` | [`OverwriteRequest`] | [`AppendAck`] |
//! | `DELETE` | `/games/{id}` | | `204` |
//! | `POST` | `/games/{id}/hello` | [`HelloRequest`] | [`HelloResponse`] |
//! | `POST` | `/games/{id}/actions` | [`AppendRequest`] | [`AppendAck`] |
//! | `POST` | `/games/{id}/action` | [`SubmitRequest`] | [`AppendAck`] |
//! | `GET` | `/games/{id}/watch?after={revision}` | | [`WatchResponse`] |
//!
//! Errors come back as [`ErrorBody`] with status 409 (conflict), 421 (not
//! leader, `leader` set), 503 (quorum timeout), 401/403 (access), 404
//! (unknown game).

use serde::{Deserialize, Serialize};

use scorebook_model::{Action, Game, GameId, Revision};

/// Header carrying the caller's identity for access checks.
pub const USER_HEADER: &str = "x-scorebook-user";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloRequest {
    pub game_id: GameId,
    /// Last revision the client saw acknowledged.
    pub revision: Revision,
    /// Length of the log prefix the client holds as committed.
    pub confirmed: usize,
    /// `log_digest` of that prefix.
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HelloResponse {
    /// The client's committed prefix is the whole server log.
    UpToDate { revision: Revision },
    /// The client's prefix matches and the server has more after it.
    FastForward {
        revision: Revision,
        actions: Vec<Action>,
    },
    /// The client's prefix does not match the server log.
    Diverged { game: Game },
    /// The server has no such game.
    Gone,
}

/// Answer to a long-poll on one game's committed revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WatchResponse {
    /// The committed revision moved past the one the client watched from.
    Changed { revision: Revision },
    /// Nothing was committed before the server's wait ran out.
    Unchanged { revision: Revision },
    Gone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendRequest {
    pub game_id: GameId,
    pub expected_revision: Revision,
    pub actions: Vec<Action>,
}

/// One action, as a UI or script submits it. Without `expected_revision` the
/// action is appended wherever the log currently ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_revision: Option<Revision>,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendAck {
    pub game_id: GameId,
    pub revision: Revision,
    /// Server log length after the write.
    pub length: usize,
    /// The batch had already been committed; nothing new was written.
    #[serde(default)]
    pub duplicate: bool,
}

/// Force-save: the client's full log becomes the authoritative one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverwriteRequest {
    pub game: Game,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub game: Game,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<Revision>,
}
