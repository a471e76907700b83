//! Durable consensus state: current term, vote, log entries, and the latest
//! snapshot.
//!
//! The core emits [`LogOp`]s; a node writes them before sending any message
//! produced by the same step. [`FileLogStore`] appends one JSON line per op
//! and rewrites the file compactly whenever a snapshot is written.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::command::NodeId;
use crate::error::ClusterError;
use crate::machine::ClusterSnapshot;
use crate::raft::{Entry, LogIndex, Term};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogOp {
    HardState {
        term: Term,
        voted_for: Option<NodeId>,
    },
    Append {
        entries: Vec<Entry>,
    },
    TruncateFrom {
        index: LogIndex,
    },
    Snapshot {
        snapshot: ClusterSnapshot,
    },
}

/// Everything a restarting node recovers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedLog {
    pub term: Term,
    pub voted_for: Option<NodeId>,
    pub snapshot: Option<ClusterSnapshot>,
    pub entries: Vec<Entry>,
}

impl PersistedLog {
    pub fn is_empty(&self) -> bool {
        self.term == 0 && self.snapshot.is_none() && self.entries.is_empty()
    }

    pub fn apply(&mut self, op: LogOp) {
        match op {
            LogOp::HardState { term, voted_for } => {
                self.term = term;
                self.voted_for = voted_for;
            }
            LogOp::Append { entries } => {
                for entry in entries {
                    self.entries.retain(|e| e.index < entry.index);
                    self.entries.push(entry);
                }
            }
            LogOp::TruncateFrom { index } => self.entries.retain(|e| e.index < index),
            LogOp::Snapshot { snapshot } => {
                self.entries.retain(|e| e.index > snapshot.index);
                self.snapshot = Some(snapshot);
            }
        }
    }

    /// The minimal op sequence that rebuilds this state.
    fn compacted_ops(&self) -> Vec<LogOp> {
        let mut ops = Vec::new();
        if let Some(snapshot) = &self.snapshot {
            ops.push(LogOp::Snapshot {
                snapshot: snapshot.clone(),
            });
        }
        ops.push(LogOp::HardState {
            term: self.term,
            voted_for: self.voted_for.clone(),
        });
        if !self.entries.is_empty() {
            ops.push(LogOp::Append {
                entries: self.entries.clone(),
            });
        }
        ops
    }
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn load(&self) -> Result<PersistedLog, ClusterError>;

    /// Durably record `ops` in order.
    async fn persist(&self, ops: Vec<LogOp>) -> Result<(), ClusterError>;
}

// ──────────────────────────────────────────────
// Memory
// ──────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryLogStore {
    state: Mutex<PersistedLog>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn load(&self) -> Result<PersistedLog, ClusterError> {
        Ok(self.state.lock().await.clone())
    }

    async fn persist(&self, ops: Vec<LogOp>) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        for op in ops {
            state.apply(op);
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────
// File
// ──────────────────────────────────────────────

/// JSON-lines log file. A torn final line from a crash mid-write is ignored
/// on load.
#[derive(Debug)]
pub struct FileLogStore {
    path: PathBuf,
    /// Mirror of the file contents, used to rewrite it compactly.
    state: Mutex<PersistedLog>,
}

impl FileLogStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ClusterError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let state = read_ops(&path)?;
        Ok(FileLogStore {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_ops(path: &Path) -> Result<PersistedLog, ClusterError> {
    let mut state = PersistedLog::default();
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(state),
        Err(e) => return Err(e.into()),
    };
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str::<LogOp>(line) {
            Ok(op) => state.apply(op),
            Err(e) if i + 1 == lines.len() => {
                warn!(path = %path.display(), error = %e, "ignoring torn final log line");
            }
            Err(e) => {
                return Err(ClusterError::LogStore(format!(
                    "{} line {}: {}",
                    path.display(),
                    i + 1,
                    e
                )))
            }
        }
    }
    Ok(state)
}

fn encode(ops: &[LogOp]) -> Result<Vec<u8>, ClusterError> {
    let mut buf = Vec::new();
    for op in ops {
        serde_json::to_writer(&mut buf, op)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn load(&self) -> Result<PersistedLog, ClusterError> {
        Ok(self.state.lock().await.clone())
    }

    async fn persist(&self, ops: Vec<LogOp>) -> Result<(), ClusterError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        let rewrite = ops.iter().any(|op| matches!(op, LogOp::Snapshot { .. }));
        for op in ops.iter().cloned() {
            state.apply(op);
        }

        let path = self.path.clone();
        if rewrite {
            let bytes = encode(&state.compacted_ops())?;
            debug!(path = %path.display(), bytes = bytes.len(), "rewriting compacted raft log");
            tokio::task::spawn_blocking(move || {
                let temp = path.with_extension("jsonl.tmp");
                std::fs::write(&temp, &bytes)?;
                std::fs::rename(&temp, &path)
            })
            .await
            .map_err(|e| ClusterError::LogStore(format!("task join error: {e}")))??;
        } else {
            let bytes = encode(&ops)?;
            tokio::task::spawn_blocking(move || {
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)?;
                file.write_all(&bytes)?;
                file.sync_data()
            })
            .await
            .map_err(|e| ClusterError::LogStore(format!("task join error: {e}")))??;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, Membership};
    use tempfile::TempDir;

    fn entry(index: LogIndex, term: Term) -> Entry {
        Entry {
            index,
            term,
            command: Command::Noop,
        }
    }

    fn snapshot(index: LogIndex) -> ClusterSnapshot {
        ClusterSnapshot {
            index,
            term: 1,
            games: vec![],
            teams: vec![],
            membership: Membership::single("n1", "n1:7401", "k"),
        }
    }

    #[tokio::test]
    async fn file_store_recovers_after_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raft.jsonl");
        {
            let store = FileLogStore::open(&path).unwrap();
            store
                .persist(vec![
                    LogOp::HardState {
                        term: 2,
                        voted_for: Some("n1".into()),
                    },
                    LogOp::Append {
                        entries: vec![entry(1, 1), entry(2, 2), entry(3, 2)],
                    },
                ])
                .await
                .unwrap();
            store
                .persist(vec![LogOp::TruncateFrom { index: 3 }])
                .await
                .unwrap();
        }
        let reopened = FileLogStore::open(&path).unwrap().load().await.unwrap();
        assert_eq!(reopened.term, 2);
        assert_eq!(reopened.voted_for.as_deref(), Some("n1"));
        assert_eq!(reopened.entries, vec![entry(1, 1), entry(2, 2)]);
    }

    #[tokio::test]
    async fn snapshot_rewrites_file_compactly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raft.jsonl");
        let store = FileLogStore::open(&path).unwrap();
        store
            .persist(vec![LogOp::Append {
                entries: (1..=5).map(|i| entry(i, 1)).collect(),
            }])
            .await
            .unwrap();
        store
            .persist(vec![LogOp::Snapshot {
                snapshot: snapshot(4),
            }])
            .await
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        let reopened = FileLogStore::open(&path).unwrap().load().await.unwrap();
        assert_eq!(reopened.snapshot.map(|s| s.index), Some(4));
        assert_eq!(reopened.entries, vec![entry(5, 1)]);
    }

    #[tokio::test]
    async fn torn_last_line_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raft.jsonl");
        let good = serde_json::to_string(&LogOp::HardState {
            term: 4,
            voted_for: None,
        })
        .unwrap();
        std::fs::write(&path, format!("{good}\n{{\"op\":\"app")).unwrap();
        let state = FileLogStore::open(&path).unwrap().load().await.unwrap();
        assert_eq!(state.term, 4);
    }

    #[tokio::test]
    async fn memory_store_applies_ops_in_order() {
        let store = MemoryLogStore::new();
        assert!(store.load().await.unwrap().is_empty());
        store
            .persist(vec![
                LogOp::Append {
                    entries: vec![entry(1, 1), entry(2, 1)],
                },
                LogOp::Append {
                    entries: vec![entry(2, 2)],
                },
            ])
            .await
            .unwrap();
        assert_eq!(
            store.load().await.unwrap().entries,
            vec![entry(1, 1), entry(2, 2)]
        );
    }
}
