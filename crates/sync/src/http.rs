//! HTTP transport to a cluster node.
//!
//! ureq is synchronous, so every call runs on the blocking pool. A `421`
//! answer names the current leader; the transport re-sends there and keeps
//! talking to it afterwards.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use scorebook_model::{Game, GameId, Revision};

use crate::error::SyncError;
use crate::protocol::{
    AppendAck, AppendRequest, CreateRequest, ErrorBody, HelloRequest, HelloResponse,
    OverwriteRequest, WatchResponse, USER_HEADER,
};
use crate::transport::SyncTransport;

/// Redirect hops followed before giving up with `NotLeader`.
const MAX_REDIRECTS: usize = 3;

/// Longer than a node holds a watch open.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy)]
enum Method {
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
    /// Base URL of the node currently believed to lead.
    base: Arc<RwLock<String>>,
    user: Option<String>,
}

impl HttpTransport {
    /// `base` is a URL (`http://host:port`) or a bare `host:port`.
    pub fn new(base: &str) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        HttpTransport {
            agent: config.into(),
            base: Arc::new(RwLock::new(normalize_base(base))),
            user: None,
        }
    }

    /// Identify requests as `user` for the server's access checks.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn base_url(&self) -> String {
        self.base
            .read()
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    fn set_base(&self, base: String) {
        if let Ok(mut current) = self.base.write() {
            *current = base;
        }
    }

    async fn call<B, R>(&self, method: Method, path: String, body: Option<B>) -> Result<R, SyncError>
    where
        B: Serialize + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let mut base = self.base_url();
        for _ in 0..=MAX_REDIRECTS {
            let agent = self.agent.clone();
            let user = self.user.clone();
            let url = format!("{base}{path}");
            let payload = match &body {
                Some(b) => Some(
                    serde_json::to_value(b)
                        .map_err(|e| SyncError::Protocol(format!("encode request: {e}")))?,
                ),
                None => None,
            };

            let result = tokio::task::spawn_blocking(move || {
                send::<R>(&agent, method, &url, user.as_deref(), payload)
            })
            .await
            .map_err(|e| SyncError::Protocol(format!("task join error: {e}")))?;

            match result {
                Err(SyncError::NotLeader {
                    leader: Some(leader),
                }) => {
                    let next = normalize_base(&leader);
                    if next == base {
                        return Err(SyncError::NotLeader {
                            leader: Some(leader),
                        });
                    }
                    info!(from = %base, to = %next, "following leader redirect");
                    self.set_base(next.clone());
                    base = next;
                }
                other => return other,
            }
        }
        Err(SyncError::NotLeader { leader: None })
    }
}

fn normalize_base(addr: &str) -> String {
    let trimmed = addr.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

/// One blocking request. Connection failures are `Unavailable`; HTTP error
/// statuses are decoded from the JSON error body.
fn send<R: DeserializeOwned>(
    agent: &ureq::Agent,
    method: Method,
    url: &str,
    user: Option<&str>,
    body: Option<serde_json::Value>,
) -> Result<R, SyncError> {
    debug!(?method, url, "sync request");
    let user = user.unwrap_or("");
    let response = match (method, body) {
        (Method::Get, _) => agent.get(url).header(USER_HEADER, user).call(),
        (Method::Delete, _) => agent.delete(url).header(USER_HEADER, user).call(),
        (Method::Post, Some(b)) => agent.post(url).header(USER_HEADER, user).send_json(&b),
        (Method::Post, None) => agent.post(url).header(USER_HEADER, user).send_empty(),
        (Method::Put, Some(b)) => agent.put(url).header(USER_HEADER, user).send_json(&b),
        (Method::Put, None) => agent.put(url).header(USER_HEADER, user).send_empty(),
    }
    .map_err(|e| SyncError::Unavailable(e.to_string()))?;

    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        if status == 204 {
            return serde_json::from_value(serde_json::Value::Null)
                .map_err(|e| SyncError::Protocol(format!("empty response: {e}")));
        }
        return response
            .into_body()
            .read_json::<R>()
            .map_err(|e| SyncError::Protocol(format!("decode response: {e}")));
    }

    let err: ErrorBody = response
        .into_body()
        .read_json()
        .unwrap_or_else(|_| ErrorBody {
            error: format!("http status {status}"),
            leader: None,
            revision: None,
        });
    Err(classify(status, err))
}

fn classify(status: u16, body: ErrorBody) -> SyncError {
    match status {
        409 => SyncError::Conflict {
            message: body.error,
            server_revision: body.revision,
        },
        421 => SyncError::NotLeader {
            leader: body.leader,
        },
        503 => SyncError::QuorumTimeout,
        401 | 403 => SyncError::Forbidden(body.error),
        404 => SyncError::NotFound(body.error),
        _ => SyncError::Protocol(format!("http {status}: {}", body.error)),
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn hello(&self, req: HelloRequest) -> Result<HelloResponse, SyncError> {
        let path = format!("/games/{}/hello", req.game_id);
        self.call(Method::Post, path, Some(req)).await
    }

    async fn append(&self, req: AppendRequest) -> Result<AppendAck, SyncError> {
        let path = format!("/games/{}/actions", req.game_id);
        self.call(Method::Post, path, Some(req)).await
    }

    async fn overwrite(&self, req: OverwriteRequest) -> Result<AppendAck, SyncError> {
        let path = format!("/games/{}", req.game.id);
        self.call(Method::Put, path, Some(req)).await
    }

    async fn create(&self, req: CreateRequest) -> Result<AppendAck, SyncError> {
        self.call(Method::Post, "/games".to_string(), Some(req)).await
    }

    async fn fetch(&self, game_id: GameId) -> Result<Game, SyncError> {
        self.call::<(), Game>(Method::Get, format!("/games/{game_id}"), None)
            .await
    }

    async fn delete(&self, game_id: GameId) -> Result<(), SyncError> {
        self.call::<(), ()>(Method::Delete, format!("/games/{game_id}"), None)
            .await
    }

    async fn watch(&self, game_id: GameId, after: Revision) -> Result<WatchResponse, SyncError> {
        let path = format!("/games/{game_id}/watch?after={after}");
        self.call::<(), WatchResponse>(Method::Get, path, None).await
    }
}
