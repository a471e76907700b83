//! Node-to-node transport.
//!
//! [`HttpPeerTransport`] posts to a peer's `/raft/message` and
//! `/cluster/join` routes. [`MemoryNetwork`] delivers straight into nodes in
//! the same process and can cut individual nodes off, which is how the
//! cluster tests stage partitions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use scorebook_sync::ErrorBody;

use crate::error::{ClusterError, TransportError};
use crate::join::{JoinRequest, JoinResponse};
use crate::node::ClusterNode;
use crate::raft::Envelope;

/// Header carrying the shared cluster secret on node-to-node routes.
pub const CLUSTER_SECRET_HEADER: &str = "x-scorebook-cluster-secret";

const MAX_REDIRECTS: usize = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Fire one consensus message at `addr`. Delivery is not acknowledged;
    /// the reply, if any, arrives as a separate envelope.
    async fn send(&self, addr: &str, envelope: Envelope) -> Result<(), TransportError>;

    /// Run the join handshake against `addr`, following leader redirects.
    async fn join(&self, addr: &str, request: JoinRequest) -> Result<JoinResponse, ClusterError>;
}

// ──────────────────────────────────────────────
// In-process
// ──────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryNetwork {
    nodes: Mutex<BTreeMap<String, Weak<ClusterNode>>>,
    isolated: Mutex<BTreeSet<String>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, addr: &str, node: &Arc<ClusterNode>) {
        if let Ok(mut nodes) = self.nodes.lock() {
            nodes.insert(addr.to_string(), Arc::downgrade(node));
        }
    }

    /// Drop all traffic to and from `addr` until [`heal`](Self::heal).
    pub fn isolate(&self, addr: &str) {
        if let Ok(mut isolated) = self.isolated.lock() {
            isolated.insert(addr.to_string());
        }
    }

    pub fn heal(&self, addr: &str) {
        if let Ok(mut isolated) = self.isolated.lock() {
            isolated.remove(addr);
        }
    }

    fn is_isolated(&self, addr: &str) -> bool {
        self.isolated
            .lock()
            .map(|i| i.contains(addr))
            .unwrap_or(false)
    }

    fn node(&self, addr: &str) -> Result<Arc<ClusterNode>, TransportError> {
        if self.is_isolated(addr) {
            return Err(TransportError::Unreachable(addr.to_string()));
        }
        self.nodes
            .lock()
            .ok()
            .and_then(|nodes| nodes.get(addr).and_then(Weak::upgrade))
            .ok_or_else(|| TransportError::Unreachable(addr.to_string()))
    }
}

#[async_trait]
impl PeerTransport for MemoryNetwork {
    async fn send(&self, addr: &str, envelope: Envelope) -> Result<(), TransportError> {
        if self.is_isolated(&envelope.from_addr) {
            return Err(TransportError::Unreachable(addr.to_string()));
        }
        let node = self.node(addr)?;
        node.receive(envelope).await;
        Ok(())
    }

    async fn join(&self, addr: &str, request: JoinRequest) -> Result<JoinResponse, ClusterError> {
        let mut target = addr.to_string();
        for _ in 0..=MAX_REDIRECTS {
            if self.is_isolated(&request.claims.advertise_addr) {
                return Err(TransportError::Unreachable(target).into());
            }
            let node = self.node(&target)?;
            match node.handle_join(request.clone()).await {
                Err(ClusterError::NotLeader {
                    leader_addr: Some(leader),
                }) if leader != target => {
                    info!(from = %target, to = %leader, "following leader redirect for join");
                    target = leader;
                }
                other => return other,
            }
        }
        Err(ClusterError::NotLeader { leader_addr: None })
    }
}

// ──────────────────────────────────────────────
// HTTP
// ──────────────────────────────────────────────

#[derive(Clone)]
pub struct HttpPeerTransport {
    agent: ureq::Agent,
    secret: Option<String>,
}

impl HttpPeerTransport {
    pub fn new(secret: Option<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        HttpPeerTransport {
            agent: config.into(),
            secret,
        }
    }

    async fn post<B, R>(&self, addr: &str, path: &str, body: &B) -> Result<R, TransportError>
    where
        B: Serialize,
        R: DeserializeOwned + Send + 'static,
    {
        let payload =
            serde_json::to_value(body).map_err(|e| TransportError::Decode(e.to_string()))?;
        let agent = self.agent.clone();
        let secret = self.secret.clone();
        let url = format!("{}{}", base_url(addr), path);
        tokio::task::spawn_blocking(move || post_blocking(&agent, &url, secret.as_deref(), payload))
            .await
            .map_err(|e| TransportError::Unreachable(format!("task join error: {e}")))?
    }
}

fn base_url(addr: &str) -> String {
    let trimmed = addr.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

fn post_blocking<R: DeserializeOwned>(
    agent: &ureq::Agent,
    url: &str,
    secret: Option<&str>,
    payload: serde_json::Value,
) -> Result<R, TransportError> {
    let mut request = agent.post(url);
    if let Some(secret) = secret {
        request = request.header(CLUSTER_SECRET_HEADER, secret);
    }
    let response = request
        .send_json(&payload)
        .map_err(|e| TransportError::Unreachable(format!("{url}: {e}")))?;

    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        if status == 204 {
            return serde_json::from_value(serde_json::Value::Null)
                .map_err(|e| TransportError::Decode(e.to_string()));
        }
        return response
            .into_body()
            .read_json::<R>()
            .map_err(|e| TransportError::Decode(e.to_string()));
    }
    let body: ErrorBody = response
        .into_body()
        .read_json()
        .unwrap_or_else(|_| ErrorBody {
            error: format!("http status {status}"),
            leader: None,
            revision: None,
        });
    Err(TransportError::Status {
        status,
        message: body.error,
        leader: body.leader,
    })
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn send(&self, addr: &str, envelope: Envelope) -> Result<(), TransportError> {
        self.post::<_, ()>(addr, "/raft/message", &envelope).await
    }

    async fn join(&self, addr: &str, request: JoinRequest) -> Result<JoinResponse, ClusterError> {
        let mut target = addr.to_string();
        for _ in 0..=MAX_REDIRECTS {
            match self.post::<_, JoinResponse>(&target, "/cluster/join", &request).await {
                Err(TransportError::Status {
                    status: 421,
                    leader: Some(leader),
                    ..
                }) if leader != target => {
                    info!(from = %target, to = %leader, "following leader redirect for join");
                    target = leader;
                }
                Err(TransportError::Status {
                    status: 421,
                    leader,
                    ..
                }) => return Err(ClusterError::NotLeader {
                    leader_addr: leader,
                }),
                Err(TransportError::Status {
                    status: 403,
                    message,
                    ..
                }) => return Err(ClusterError::Forbidden(message)),
                Err(e) => {
                    debug!(addr = %target, error = %e, "join request failed");
                    return Err(e.into());
                }
                Ok(response) => return Ok(response),
            }
        }
        Err(ClusterError::NotLeader { leader_addr: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_addresses_become_base_urls() {
        assert_eq!(base_url("10.0.0.3:7401"), "http://10.0.0.3:7401");
        assert_eq!(base_url("https://n3.example/"), "https://n3.example");
    }

    #[tokio::test]
    async fn unknown_peer_is_unreachable() {
        let net = MemoryNetwork::new();
        let envelope = Envelope {
            from: "a".into(),
            from_addr: "a:1".into(),
            to: "b".into(),
            message: crate::raft::Message::Vote {
                term: 1,
                granted: false,
            },
        };
        assert!(matches!(
            net.send("b:1", envelope).await,
            Err(TransportError::Unreachable(_))
        ));
    }
}
