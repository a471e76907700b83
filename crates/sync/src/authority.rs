//! Rules the authoritative copy of a game applies to sync requests.
//!
//! These are pure functions over a [`Game`]: the cluster state machine and
//! the in-process test server both call them, so every server answers a
//! client the same way.

use scorebook_model::{log_digest, Action, Game, GameId, Revision};

use crate::error::SyncError;
use crate::protocol::{AppendAck, HelloRequest, HelloResponse};

/// Compare a client's committed prefix against the server log.
pub fn answer_hello(server: Option<&Game>, req: &HelloRequest) -> HelloResponse {
    let Some(game) = server else {
        return HelloResponse::Gone;
    };

    let prefix_matches = req.confirmed <= game.actions.len()
        && log_digest(&game.actions[..req.confirmed]) == req.digest;
    if !prefix_matches {
        return HelloResponse::Diverged { game: game.clone() };
    }

    if req.confirmed == game.actions.len() {
        HelloResponse::UpToDate {
            revision: game.revision,
        }
    } else {
        HelloResponse::FastForward {
            revision: game.revision,
            actions: game.actions[req.confirmed..].to_vec(),
        }
    }
}

/// True when `actions` is already in the log as one contiguous run.
pub fn already_committed(game: &Game, actions: &[Action]) -> bool {
    let Some(first) = actions.first() else {
        return false;
    };
    let Some(start) = game.actions.iter().position(|a| a.id == first.id) else {
        return false;
    };
    game.actions[start..]
        .iter()
        .map(|a| a.id)
        .take(actions.len())
        .eq(actions.iter().map(|a| a.id))
}

/// Append a batch as one contiguous write and bump the revision.
///
/// A resubmitted batch that is already committed is acknowledged again
/// without writing. With `expected_revision` set, any other revision is a
/// conflict.
pub fn apply_append(
    game: &mut Game,
    expected_revision: Option<Revision>,
    actions: Vec<Action>,
) -> Result<AppendAck, SyncError> {
    if already_committed(game, &actions) {
        return Ok(ack(game, true));
    }
    if let Some(expected) = expected_revision {
        if expected != game.revision {
            return Err(SyncError::conflict(
                format!(
                    "game {} is at revision {}, request expected {}",
                    game.id, game.revision, expected
                ),
                Some(game.revision),
            ));
        }
    }
    if actions.is_empty() {
        return Ok(ack(game, false));
    }
    game.append_all(actions)?;
    game.revision += 1;
    Ok(ack(game, false))
}

/// Replace the log wholesale (force-save).
pub fn apply_overwrite(game: &mut Game, incoming: Game) -> Result<AppendAck, SyncError> {
    let mut replacement = Game::from_header(game.header(), Vec::new());
    replacement.roster = incoming.roster;
    replacement.rules = incoming.rules;
    replacement.append_all(incoming.actions)?;
    replacement.revision = game.revision.max(incoming.revision) + 1;
    *game = replacement;
    Ok(ack(game, false))
}

/// Admit a new game at revision 1. Re-creating an identical game is an
/// idempotent success; anything else under a taken id is a conflict.
pub fn admit_new(existing: Option<&Game>, incoming: Game) -> Result<Game, SyncError> {
    if let Some(current) = existing {
        if log_digest(&current.actions) == log_digest(&incoming.actions) {
            return Ok(current.clone());
        }
        return Err(SyncError::conflict(
            format!("game {} already exists", incoming.id),
            Some(current.revision),
        ));
    }
    let mut game = Game::from_header(incoming.header(), Vec::new());
    game.append_all(incoming.actions)?;
    game.revision = 1;
    Ok(game)
}

pub fn ack(game: &Game, duplicate: bool) -> AppendAck {
    AppendAck {
        game_id: game.id,
        revision: game.revision,
        length: game.actions.len(),
        duplicate,
    }
}

pub fn not_found(id: &GameId) -> SyncError {
    SyncError::NotFound(format!("game {id}"))
}
