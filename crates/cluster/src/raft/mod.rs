//! Leader-based log replication.

mod consensus;
mod log;
mod message;

pub type Term = u64;
pub type LogIndex = u64;

pub use self::consensus::{Applied, NotLeader, RaftCore, RaftStatus, Role};
pub use self::log::{Entry, RaftLog};
pub use self::message::{Envelope, Message};
