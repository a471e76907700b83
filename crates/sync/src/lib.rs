//! Client sync manager.
//!
//! A [`SyncSession`] owns one game's local log. It records actions
//! optimistically, keeps the replayed state current, persists through a
//! [`GameStore`](scorebook_storage::GameStore), and reconciles with the
//! authoritative copy over a [`SyncTransport`]. Divergence is detected by
//! comparing digests of the committed prefix and is never merged
//! automatically: the caller picks a [`Resolution`].

pub mod authority;
mod error;
mod http;
mod inproc;
pub mod protocol;
mod session;
mod transport;

pub use error::SyncError;
pub use http::HttpTransport;
pub use inproc::{InProcessServer, InProcessTransport};
pub use protocol::{
    AppendAck, AppendRequest, CreateRequest, ErrorBody, HelloRequest, HelloResponse,
    OverwriteRequest, SubmitRequest, WatchResponse, USER_HEADER,
};
pub use session::{Divergence, Resolution, SyncSession, SyncState};
pub use transport::SyncTransport;
