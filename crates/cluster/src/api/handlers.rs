//! Route handlers: games, teams, and node-to-node traffic.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use scorebook_model::{Access, GameId, Revision, TeamRecord};
use scorebook_sync::{AppendRequest, CreateRequest, HelloRequest, OverwriteRequest, SubmitRequest};

use super::state::{principal, AppState};
use super::{cluster_error, json_error};
use crate::join::{JoinRequest, APP_VERSION};
use crate::raft::Envelope;

/// Longest a watch is held open.
const MAX_WATCH_MS: u64 = 10_000;

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// Refuse the request unless the caller holds at least `needed` on the game.
fn check_access(
    state: &AppState,
    game_id: &GameId,
    headers: &HeaderMap,
    needed: Access,
) -> Result<(), Response> {
    if state.access(game_id, headers) >= needed {
        return Ok(());
    }
    if principal(headers).is_none() {
        Err(json_error(StatusCode::UNAUTHORIZED, "authentication required"))
    } else {
        Err(json_error(
            StatusCode::FORBIDDEN,
            &format!("no {needed:?} access to game {game_id}"),
        ))
    }
}

fn path_mismatch(path: &GameId, body: &GameId) -> Response {
    json_error(
        StatusCode::BAD_REQUEST,
        &format!("path names game {path} but body names {body}"),
    )
}

/// GET /health
pub(crate) async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "nodeId": state.node.id(),
        "version": APP_VERSION,
    });
    (StatusCode::OK, Json(response))
}

// ── Games ────────────────────────────────────────────────────────────────────

/// GET /games
pub(crate) async fn handle_list_games(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let headers_visible: Vec<_> = state
        .node
        .list_games()
        .await
        .into_iter()
        .filter(|g| state.access(&g.id, &headers) >= Access::Read)
        .collect();
    Json(headers_visible).into_response()
}

/// POST /games
pub(crate) async fn handle_create_game(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateRequest>,
) -> Response {
    if let Err(r) = check_access(&state, &req.game.id, &headers, Access::Append) {
        return r;
    }
    match state.node.create_game(req.game).await {
        Ok(ack) => (StatusCode::CREATED, Json(ack)).into_response(),
        Err(e) => cluster_error(e),
    }
}

/// GET /games/{id}
///
/// Served from this node's replica, which may trail the leader.
pub(crate) async fn handle_get_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<GameId>,
    headers: HeaderMap,
) -> Response {
    if let Err(r) = check_access(&state, &id, &headers, Access::Read) {
        return r;
    }
    match state.node.game(&id).await {
        Some(game) => Json(game).into_response(),
        None => json_error(StatusCode::NOT_FOUND, &format!("game {id} not found")),
    }
}

/// PUT /games/{id}
pub(crate) async fn handle_overwrite(
    State(state): State<Arc<AppState>>,
    Path(id): Path<GameId>,
    headers: HeaderMap,
    Json(req): Json<OverwriteRequest>,
) -> Response {
    if req.game.id != id {
        return path_mismatch(&id, &req.game.id);
    }
    if let Err(r) = check_access(&state, &id, &headers, Access::Append) {
        return r;
    }
    match state.node.overwrite(req.game).await {
        Ok(ack) => Json(ack).into_response(),
        Err(e) => cluster_error(e),
    }
}

/// DELETE /games/{id}
pub(crate) async fn handle_delete_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<GameId>,
    headers: HeaderMap,
) -> Response {
    if let Err(r) = check_access(&state, &id, &headers, Access::Append) {
        return r;
    }
    match state.node.delete_game(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => cluster_error(e),
    }
}

/// POST /games/{id}/hello
pub(crate) async fn handle_hello(
    State(state): State<Arc<AppState>>,
    Path(id): Path<GameId>,
    headers: HeaderMap,
    Json(req): Json<HelloRequest>,
) -> Response {
    if req.game_id != id {
        return path_mismatch(&id, &req.game_id);
    }
    if let Err(r) = check_access(&state, &id, &headers, Access::Read) {
        return r;
    }
    match state.node.hello(&req).await {
        Ok(answer) => Json(answer).into_response(),
        Err(e) => cluster_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WatchQuery {
    #[serde(default)]
    after: Revision,
    wait_ms: Option<u64>,
}

/// GET /games/{id}/watch?after={revision}
///
/// Answers as soon as this replica applies a revision past `after`. Like
/// GET /games/{id}, any node serves it.
pub(crate) async fn handle_watch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<GameId>,
    Query(query): Query<WatchQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(r) = check_access(&state, &id, &headers, Access::Read) {
        return r;
    }
    let wait = Duration::from_millis(query.wait_ms.unwrap_or(MAX_WATCH_MS).min(MAX_WATCH_MS));
    Json(state.node.watch_game(&id, query.after, wait).await).into_response()
}

/// POST /games/{id}/actions
pub(crate) async fn handle_append(
    State(state): State<Arc<AppState>>,
    Path(id): Path<GameId>,
    headers: HeaderMap,
    Json(req): Json<AppendRequest>,
) -> Response {
    if req.game_id != id {
        return path_mismatch(&id, &req.game_id);
    }
    if let Err(r) = check_access(&state, &id, &headers, Access::Append) {
        return r;
    }
    match state.node.append(req).await {
        Ok(ack) => Json(ack).into_response(),
        Err(e) => cluster_error(e),
    }
}

/// POST /games/{id}/action
pub(crate) async fn handle_submit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<GameId>,
    headers: HeaderMap,
    Json(req): Json<SubmitRequest>,
) -> Response {
    if let Err(r) = check_access(&state, &id, &headers, Access::Append) {
        return r;
    }
    match state.node.submit(id, req).await {
        Ok(ack) => Json(ack).into_response(),
        Err(e) => cluster_error(e),
    }
}

// ── Teams ────────────────────────────────────────────────────────────────────

/// GET /teams
pub(crate) async fn handle_list_teams(State(state): State<Arc<AppState>>) -> Response {
    Json(state.node.teams().await).into_response()
}

/// POST /teams
pub(crate) async fn handle_put_team(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(team): Json<TeamRecord>,
) -> Response {
    if principal(&headers).is_none() {
        return json_error(StatusCode::UNAUTHORIZED, "authentication required");
    }
    match state.node.put_team(team).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => cluster_error(e),
    }
}

// ── Cluster ──────────────────────────────────────────────────────────────────

/// GET /cluster/status
pub(crate) async fn handle_status(State(state): State<Arc<AppState>>) -> Response {
    Json(state.node.status().await).into_response()
}

/// POST /cluster/join
pub(crate) async fn handle_join(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JoinRequest>,
) -> Response {
    match state.node.handle_join(req).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => cluster_error(e),
    }
}

/// POST /raft/message
pub(crate) async fn handle_raft_message(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    debug!(from = %envelope.from, kind = envelope.message.kind(), "raft message");
    state.node.receive(envelope).await;
    StatusCode::NO_CONTENT.into_response()
}
