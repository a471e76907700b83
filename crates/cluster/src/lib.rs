//! Replicated scorebook store.
//!
//! A set of nodes keeps one committed, ordered log of [`Command`]s using a
//! leader-based consensus protocol. Each committed command is applied to a
//! [`GameMachine`] holding every game, and its effects are written through
//! to the node's [`GameStore`](scorebook_storage::GameStore). Clients speak
//! the sync protocol of `scorebook-sync` to any node; followers redirect
//! writes to the leader.
//!
//! - [`raft`]: the deterministic consensus core, free of I/O and clocks.
//! - [`node`]: the async runtime around it (ticks, persistence, transport).
//! - [`join`] and [`identity`]: the signed join handshake and node keys.
//! - [`api`]: the axum router a node serves.

pub mod api;
pub mod command;
pub mod config;
pub mod error;
pub mod identity;
pub mod join;
pub mod log_store;
pub mod machine;
pub mod node;
pub mod raft;
pub mod transport;

pub use command::{Command, CommandOutput, Effect, Member, Membership, NodeId};
pub use config::{cluster_secret_from_env, NodeConfig, RaftConfig, CLUSTER_SECRET_ENV};
pub use error::{ClusterError, JoinError, TransportError};
pub use identity::TrustedKeys;
pub use join::{JoinRequest, JoinResponse, APP_VERSION, PROTOCOL_VERSION, SCHEMA_VERSION};
pub use log_store::{FileLogStore, LogOp, LogStore, MemoryLogStore, PersistedLog};
pub use machine::{ClusterSnapshot, GameMachine};
pub use node::{ClusterNode, NodeOptions, StartMode};
pub use transport::{HttpPeerTransport, MemoryNetwork, PeerTransport, CLUSTER_SECRET_HEADER};
