use scorebook_model::{ModelError, Revision};
use scorebook_storage::StorageError;
use scorebook_sync::SyncError;

/// Errors surfaced by a cluster node.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// This node does not lead. `leader_addr` is the advertised address of
    /// the node that does, when known.
    #[error("not the leader (leader: {})", leader_addr.as_deref().unwrap_or("unknown"))]
    NotLeader { leader_addr: Option<String> },

    /// The entry was not committed within the commit timeout. It may still
    /// commit; resubmitting the same batch is safe.
    #[error("quorum not reached before timeout")]
    QuorumTimeout,

    /// The entry was replaced by a new leader before it committed.
    #[error("proposal dropped by leadership change")]
    ProposalDropped,

    #[error("revision conflict: {message}")]
    Conflict {
        message: String,
        revision: Option<Revision>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("node is shutting down")]
    Shutdown,

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("log store: {0}")]
    LogStore(String),
}

impl From<std::io::Error> for ClusterError {
    fn from(e: std::io::Error) -> Self {
        ClusterError::LogStore(e.to_string())
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        ClusterError::LogStore(e.to_string())
    }
}

impl From<SyncError> for ClusterError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Conflict {
                message,
                server_revision,
            } => ClusterError::Conflict {
                message,
                revision: server_revision,
            },
            SyncError::NotFound(what) => ClusterError::NotFound(what),
            SyncError::Model(m) => ClusterError::Model(m),
            SyncError::Storage(s) => ClusterError::Storage(s),
            other => ClusterError::Config(other.to_string()),
        }
    }
}

/// Reasons a join handshake is refused. No membership change is made when
/// any of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("public key {fingerprint} is not trusted")]
    Untrusted { fingerprint: String },

    #[error("join signature does not verify")]
    BadSignature,

    #[error("incompatible {field}: ours {ours}, theirs {theirs}")]
    Incompatible {
        field: &'static str,
        ours: String,
        theirs: String,
    },

    #[error("malformed key material: {0}")]
    BadKey(String),
}

/// Failures moving bytes between nodes.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} unreachable")]
    Unreachable(String),

    #[error("peer answered http {status}: {message}")]
    Status {
        status: u16,
        message: String,
        leader: Option<String>,
    },

    #[error("decode: {0}")]
    Decode(String),
}
