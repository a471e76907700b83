//! HTTP JSON API of a cluster node.
//!
//! Client routes (the sync protocol, see `scorebook_sync::protocol`):
//! - GET    /health                - Liveness (no auth)
//! - GET    /games                 - Headers of readable games
//! - POST   /games                 - Create a game
//! - GET    /games/{id}            - Committed game as replicated here
//! - PUT    /games/{id}            - Force-save a full log
//! - DELETE /games/{id}            - Delete a game
//! - POST   /games/{id}/hello      - Reconnect handshake (leader only)
//! - POST   /games/{id}/actions    - Append a batch at an expected revision
//! - POST   /games/{id}/action     - Append one action
//! - GET    /games/{id}/watch      - Long-poll for a newer revision
//! - GET    /teams                 - Saved team rosters
//! - POST   /teams                 - Save a team roster
//!
//! Node-to-node routes, gated by the shared cluster secret:
//! - GET    /cluster/status        - Role, term, and leader address
//! - POST   /cluster/join          - Signed join handshake
//! - POST   /raft/message          - One consensus envelope
//!
//! Writes reaching a follower answer `421` with the leader's address. All
//! responses use Content-Type: application/json.

mod handlers;
mod middleware;
mod state;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use tower_http::cors::{Any, CorsLayer};

use scorebook_model::AccessPolicy;
use scorebook_sync::ErrorBody;

use crate::error::{ClusterError, JoinError};
use crate::node::ClusterNode;

use self::handlers::{
    handle_append, handle_create_game, handle_delete_game, handle_get_game, handle_health,
    handle_hello, handle_join, handle_list_games, handle_list_teams, handle_not_found,
    handle_overwrite, handle_put_team, handle_raft_message, handle_status, handle_submit,
    handle_watch,
};
use self::middleware::cluster_secret_middleware;
use self::state::AppState;

/// Maximum request body size: 32 MB. Snapshots travel through
/// `/raft/message` and carry every game.
const MAX_BODY_SIZE: usize = 32 * 1024 * 1024;

fn json_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
            leader: None,
            revision: None,
        }),
    )
        .into_response()
}

/// Map a node error onto the status codes the sync client understands.
fn cluster_error(e: ClusterError) -> Response {
    let (status, leader, revision) = match &e {
        ClusterError::NotLeader { leader_addr } => {
            (StatusCode::MISDIRECTED_REQUEST, leader_addr.clone(), None)
        }
        ClusterError::QuorumTimeout | ClusterError::ProposalDropped | ClusterError::Shutdown => {
            (StatusCode::SERVICE_UNAVAILABLE, None, None)
        }
        ClusterError::Conflict { revision, .. } => (StatusCode::CONFLICT, None, *revision),
        ClusterError::NotFound(_) => (StatusCode::NOT_FOUND, None, None),
        ClusterError::Forbidden(_) => (StatusCode::FORBIDDEN, None, None),
        ClusterError::Join(JoinError::Untrusted { .. } | JoinError::BadSignature) => {
            (StatusCode::FORBIDDEN, None, None)
        }
        ClusterError::Join(_) | ClusterError::Model(_) => (StatusCode::BAD_REQUEST, None, None),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, None, None),
    };
    (
        status,
        Json(ErrorBody {
            error: e.to_string(),
            leader,
            revision,
        }),
    )
        .into_response()
}

/// Build the node's router.
///
/// CORS is permissive; the node sits behind whatever fronts browser traffic.
pub fn router(
    node: Arc<ClusterNode>,
    policy: Arc<dyn AccessPolicy>,
    cluster_secret: Option<String>,
) -> Router {
    let state = Arc::new(AppState {
        node,
        policy,
        cluster_secret,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/games", get(handle_list_games).post(handle_create_game))
        .route(
            "/games/{id}",
            get(handle_get_game)
                .put(handle_overwrite)
                .delete(handle_delete_game),
        )
        .route("/games/{id}/hello", post(handle_hello))
        .route("/games/{id}/actions", post(handle_append))
        .route("/games/{id}/action", post(handle_submit))
        .route("/games/{id}/watch", get(handle_watch))
        .route("/teams", get(handle_list_teams).post(handle_put_team))
        .route("/cluster/status", get(handle_status))
        .route("/cluster/join", post(handle_join))
        .route("/raft/message", post(handle_raft_message))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            cluster_secret_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_sync_status_codes() {
        let r = cluster_error(ClusterError::NotLeader {
            leader_addr: Some("n1:7401".into()),
        });
        assert_eq!(r.status(), StatusCode::MISDIRECTED_REQUEST);
        let r = cluster_error(ClusterError::Conflict {
            message: "stale".into(),
            revision: Some(3),
        });
        assert_eq!(r.status(), StatusCode::CONFLICT);
        assert_eq!(
            cluster_error(ClusterError::QuorumTimeout).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            cluster_error(ClusterError::Join(JoinError::BadSignature)).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            cluster_error(ClusterError::NotFound("game".into())).status(),
            StatusCode::NOT_FOUND
        );
    }
}
