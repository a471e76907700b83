use serde::{Deserialize, Serialize};

use crate::command::NodeId;
use crate::machine::ClusterSnapshot;

use super::log::Entry;
use super::{LogIndex, Term};

/// One consensus message between two nodes. Replies travel as separate
/// envelopes; nothing waits on a response in-line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: NodeId,
    /// Where `from` can be reached, so a node can answer peers it has not
    /// yet learned about from membership.
    pub from_addr: String,
    pub to: NodeId,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    RequestVote {
        term: Term,
        last_log_index: LogIndex,
        last_log_term: Term,
    },
    Vote {
        term: Term,
        granted: bool,
    },
    AppendEntries {
        term: Term,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<Entry>,
        leader_commit: LogIndex,
    },
    AppendResponse {
        term: Term,
        success: bool,
        /// On success, the last index now known to match the leader. On
        /// failure, the follower's last log index, used as a back-off hint.
        match_index: LogIndex,
    },
    InstallSnapshot {
        term: Term,
        snapshot: ClusterSnapshot,
    },
    SnapshotResponse {
        term: Term,
        last_index: LogIndex,
    },
}

impl Message {
    pub fn term(&self) -> Term {
        match self {
            Message::RequestVote { term, .. }
            | Message::Vote { term, .. }
            | Message::AppendEntries { term, .. }
            | Message::AppendResponse { term, .. }
            | Message::InstallSnapshot { term, .. }
            | Message::SnapshotResponse { term, .. } => *term,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::RequestVote { .. } => "request_vote",
            Message::Vote { .. } => "vote",
            Message::AppendEntries { .. } => "append_entries",
            Message::AppendResponse { .. } => "append_response",
            Message::InstallSnapshot { .. } => "install_snapshot",
            Message::SnapshotResponse { .. } => "snapshot_response",
        }
    }
}
