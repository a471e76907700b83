//! HTTP middleware: cluster secret check on node-to-node routes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use super::state::AppState;
use crate::transport::CLUSTER_SECRET_HEADER;

fn is_internal(path: &str) -> bool {
    path.starts_with("/cluster/") || path.starts_with("/raft/")
}

/// `/cluster/*` and `/raft/*` require `x-scorebook-cluster-secret` to equal
/// the configured secret. Client routes pass through untouched.
pub(crate) async fn cluster_secret_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if !is_internal(request.uri().path()) {
        return next.run(request).await;
    }

    let Some(expected) = &state.cluster_secret else {
        return super::json_error(StatusCode::FORBIDDEN, "cluster secret not configured");
    };

    match request
        .headers()
        .get(CLUSTER_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(given) if given == expected => next.run(request).await,
        Some(_) => super::json_error(StatusCode::FORBIDDEN, "invalid cluster secret"),
        None => super::json_error(StatusCode::UNAUTHORIZED, "cluster secret required"),
    }
}
