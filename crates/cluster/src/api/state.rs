//! Application state shared across request handlers.

use std::sync::Arc;

use axum::http::HeaderMap;

use scorebook_model::{Access, AccessPolicy, GameId};
use scorebook_sync::USER_HEADER;

use crate::node::ClusterNode;

pub struct AppState {
    pub(crate) node: Arc<ClusterNode>,
    /// Per-game read/append decisions for the caller named in
    /// `x-scorebook-user`.
    pub(crate) policy: Arc<dyn AccessPolicy>,
    /// Shared secret for node-to-node routes. None = those routes refuse
    /// every request.
    pub(crate) cluster_secret: Option<String>,
}

impl AppState {
    pub(crate) fn access(&self, game_id: &GameId, headers: &HeaderMap) -> Access {
        self.policy.access(game_id, principal(headers))
    }
}

pub(crate) fn principal(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|u| !u.is_empty())
}
