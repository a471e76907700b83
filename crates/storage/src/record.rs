use serde::{Deserialize, Serialize};

use scorebook_model::{Game, Revision};

/// Store-local write counter used for optimistic concurrency. Unrelated to
/// the cluster-assigned [`Revision`].
pub type StoreVersion = u64;

/// A game as stored, with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub game: Game,
    /// Starts at 0 on create, +1 on every successful save.
    pub version: StoreVersion,
    /// Length of the log prefix known to be committed by the cluster at
    /// `game.revision`. On a cluster node this is the whole log.
    #[serde(default)]
    pub confirmed: usize,
    /// RFC 3339 timestamp of the last write.
    pub updated_at: String,
}

impl GameRecord {
    pub fn new(game: Game, confirmed: usize) -> Self {
        GameRecord {
            game,
            version: 0,
            confirmed,
            updated_at: scorebook_model::now_rfc3339(),
        }
    }

    /// Revision and confirmed prefix length, as a client presents them on
    /// reconnect.
    pub fn sync_point(&self) -> (Revision, usize) {
        (self.game.revision, self.confirmed)
    }
}
