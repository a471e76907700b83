//! Node configuration.
//!
//! # Example
//!
//! ```toml
//! node_id = "press-box"
//! bind_addr = "0.0.0.0:7401"
//! advertise_addr = "10.0.0.5:7401"
//! data_dir = "/var/lib/scorebook"
//! bootstrap = true
//! signing_key = "/etc/scorebook/press-box.secret"
//! trusted_keys = ["m2b0bHh6...=", "Q0pZ...="]
//!
//! [raft]
//! tick_ms = 100
//! election_ticks = 10
//! heartbeat_ticks = 2
//! ```
//!
//! The shared cluster secret is never read from this file; it comes from
//! `SCOREBOOK_CLUSTER_SECRET`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// Environment variable holding the shared cluster secret.
pub const CLUSTER_SECRET_ENV: &str = "SCOREBOOK_CLUSTER_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Address other nodes and clients reach this node at. Defaults to
    /// `bind_addr`.
    #[serde(default)]
    pub advertise_addr: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Form a new cluster with this node as its only voter.
    #[serde(default)]
    pub bootstrap: bool,
    /// Seed node to join when not bootstrapping.
    #[serde(default)]
    pub join: Option<String>,
    /// Path to the base64 ed25519 seed written by `scorebook keygen`.
    #[serde(default)]
    pub signing_key: Option<PathBuf>,
    /// Base64 ed25519 public keys of nodes this node will cluster with.
    #[serde(default)]
    pub trusted_keys: Vec<String>,
    /// Replicate without ever voting.
    #[serde(default)]
    pub non_voter: bool,
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
    #[serde(default)]
    pub tls_key: Option<PathBuf>,
    #[serde(default)]
    pub raft: RaftConfig,
}

fn default_bind_addr() -> String {
    "0.0.0.0:7401".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, ClusterError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClusterError::Config(format!("error reading '{}': {}", path.display(), e))
        })?;
        Self::parse(&text)
            .map_err(|e| ClusterError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(text: &str) -> Result<Self, ClusterError> {
        let config: NodeConfig =
            toml::from_str(text).map_err(|e| ClusterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ClusterError> {
        if self.node_id.trim().is_empty() {
            return Err(ClusterError::Config("node_id must not be empty".to_string()));
        }
        if self.bootstrap && self.join.is_some() {
            return Err(ClusterError::Config(
                "a node either bootstraps or joins, not both".to_string(),
            ));
        }
        if self.raft.heartbeat_ticks >= self.raft.election_ticks {
            return Err(ClusterError::Config(format!(
                "raft.heartbeat_ticks ({}) must be below raft.election_ticks ({})",
                self.raft.heartbeat_ticks, self.raft.election_ticks
            )));
        }
        Ok(())
    }

    pub fn advertise_addr(&self) -> String {
        self.advertise_addr
            .clone()
            .unwrap_or_else(|| self.bind_addr.clone())
    }

    pub fn games_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    pub fn raft_log_path(&self) -> PathBuf {
        self.data_dir.join("raft.jsonl")
    }
}

/// Shared cluster secret from the environment, if set and non-empty.
pub fn cluster_secret_from_env() -> Option<String> {
    std::env::var(CLUSTER_SECRET_ENV)
        .ok()
        .filter(|s| !s.is_empty())
}

/// `[raft]` table. Times are in ticks of `tick_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    pub tick_ms: u64,
    /// Base election timeout; the actual timeout is drawn from
    /// `[election_ticks, 2 * election_ticks)`.
    pub election_ticks: u32,
    pub heartbeat_ticks: u32,
    pub commit_timeout_ms: u64,
    /// Applied entries kept in the log before compacting into a snapshot.
    pub retain_log_entries: u64,
    /// Most entries sent in one AppendEntries.
    pub max_batch: usize,
}

impl Default for RaftConfig {
    fn default() -> Self {
        RaftConfig {
            tick_ms: 100,
            election_ticks: 10,
            heartbeat_ticks: 2,
            commit_timeout_ms: 5_000,
            retain_log_entries: 1_000,
            max_batch: 64,
        }
    }
}

impl RaftConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}
