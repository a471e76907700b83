use scorebook_model::{GameId, ModelError, Revision};
use scorebook_storage::StorageError;

/// Errors surfaced by the sync layer.
///
/// Nothing here is swallowed: a session either turns the error into a state
/// change the caller can see (`Disconnected`, `Diverged`) or returns it.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The authoritative log moved since the revision the request was based on.
    #[error("revision conflict: {message}")]
    Conflict {
        message: String,
        server_revision: Option<Revision>,
    },

    /// The request reached a follower. `leader` is the advertised address of
    /// the current leader when one is known.
    #[error("not the leader (leader: {})", leader.as_deref().unwrap_or("unknown"))]
    NotLeader { leader: Option<String> },

    /// The leader could not reach a quorum in time. The write may or may not
    /// commit later; resubmitting the same batch is safe.
    #[error("quorum not reached before timeout")]
    QuorumTimeout,

    /// The server could not be reached at all.
    #[error("server unavailable: {0}")]
    Unavailable(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The game was deleted on the server; the local copy has been removed.
    #[error("game {0} was deleted on the server")]
    Gone(GameId),

    #[error("no divergence to resolve")]
    NotDiverged,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    pub fn conflict(message: impl Into<String>, server_revision: Option<Revision>) -> Self {
        SyncError::Conflict {
            message: message.into(),
            server_revision,
        }
    }
}
