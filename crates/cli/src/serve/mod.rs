//! `scorebook serve`: run one cluster node.
//!
//! Opens the node's game store and consensus log under `data_dir`, starts
//! the consensus runtime, serves the node API, and, when a seed is
//! configured, joins the existing cluster in the background.
//!
//! Security:
//! - Node-to-node routes require `SCOREBOOK_CLUSTER_SECRET`; without it the
//!   node serves clients but can neither join nor replicate.
//! - Joins are accepted only from nodes whose public key is listed in
//!   `trusted_keys`.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use scorebook_cluster::identity::{generate_signing_key, key_fingerprint, read_signing_key};
use scorebook_cluster::{
    api, cluster_secret_from_env, ClusterError, ClusterNode, FileLogStore, HttpPeerTransport,
    JoinError, NodeConfig, NodeOptions, StartMode, TrustedKeys, CLUSTER_SECRET_ENV,
};
use scorebook_model::OpenAccess;
use scorebook_storage::{FileStore, GameStore};

/// Delay between join attempts while the seed is unreachable or leaderless.
const JOIN_RETRY: Duration = Duration::from_secs(2);

/// Command-line settings that take precedence over the config file.
#[derive(Debug, Default)]
pub(crate) struct Overrides {
    pub bootstrap: bool,
    pub join: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut NodeConfig) {
        if self.bootstrap {
            config.bootstrap = true;
            config.join = None;
        }
        if let Some(seed) = self.join {
            config.bootstrap = false;
            config.join = Some(seed);
        }
    }
}

pub(crate) async fn run_node(
    config_path: &Path,
    overrides: Overrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = NodeConfig::load(config_path)?;
    overrides.apply(&mut config);
    std::fs::create_dir_all(&config.data_dir)?;

    let signing_key = match &config.signing_key {
        Some(path) => read_signing_key(path)?,
        None => {
            warn!("no signing_key configured; using an ephemeral identity no peer will trust");
            generate_signing_key()
        }
    };
    let mut trusted = TrustedKeys::from_base64(config.trusted_keys.as_slice())?;
    trusted.insert(&signing_key.verifying_key());
    info!(
        node_id = %config.node_id,
        fingerprint = %key_fingerprint(&signing_key.verifying_key()),
        "node identity loaded"
    );

    let secret = cluster_secret_from_env();
    if secret.is_none() {
        warn!(
            "{} is not set; node-to-node routes are refused",
            CLUSTER_SECRET_ENV
        );
    }

    let store: Arc<dyn GameStore> = Arc::new(FileStore::open(config.games_dir())?);
    let log_store = Arc::new(FileLogStore::open(config.raft_log_path())?);
    let transport = Arc::new(HttpPeerTransport::new(secret.clone()));

    let mode = if config.bootstrap {
        StartMode::Bootstrap
    } else {
        StartMode::Join
    };
    if mode == StartMode::Join && config.join.is_none() {
        warn!("neither bootstrap nor join is set; a fresh node will wait idle");
    }

    let options = NodeOptions {
        node_id: config.node_id.clone(),
        advertise_addr: config.advertise_addr(),
        raft: config.raft,
        signing_key,
        trusted,
        non_voter: config.non_voter,
        mode,
    };
    let node = ClusterNode::start(options, store, log_store, transport).await?;

    if let Some(seed) = config.join.clone() {
        if is_member(&node).await {
            info!(seed = %seed, "resumed as a cluster member; skipping join");
        } else {
            tokio::spawn(join_with_retry(node.clone(), seed));
        }
    }

    let app = api::router(node.clone(), Arc::new(OpenAccess), secret);
    let result = serve(app, &config).await;
    node.shutdown();
    result
}

async fn is_member(node: &ClusterNode) -> bool {
    let status = node.status().await;
    let id = node.id();
    status.voters.iter().any(|v| v == id) || status.learners.iter().any(|l| l == id)
}

/// Keep asking `seed` to admit this node until it answers. Trust and
/// version refusals are final.
async fn join_with_retry(node: Arc<ClusterNode>, seed: String) {
    loop {
        match node.join(&seed).await {
            Ok(()) => return,
            Err(e) if is_final(&e) => {
                warn!(seed = %seed, error = %e, "join refused");
                return;
            }
            Err(ClusterError::Shutdown) => return,
            Err(e) => {
                info!(seed = %seed, error = %e, "join attempt failed; retrying");
                tokio::time::sleep(JOIN_RETRY).await;
            }
        }
    }
}

fn is_final(e: &ClusterError) -> bool {
    matches!(
        e,
        ClusterError::Forbidden(_)
            | ClusterError::Join(
                JoinError::Untrusted { .. }
                    | JoinError::BadSignature
                    | JoinError::Incompatible { .. }
                    | JoinError::BadKey(_)
            )
    )
}

/// Serve the node API until Ctrl+C.
///
/// With both `tls_cert` and `tls_key` configured the node listens over
/// HTTPS via `axum-server` (requires the `tls` feature) and runs until
/// killed.
async fn serve(app: axum::Router, config: &NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.tls_cert.is_some() != config.tls_key.is_some() {
        return Err("tls_cert and tls_key must both be set".into());
    }
    let addr: SocketAddr = config.bind_addr.parse()?;

    #[cfg(feature = "tls")]
    if let (Some(cert_path), Some(key_path)) = (&config.tls_cert, &config.tls_key) {
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;
        info!(addr = %addr, node_id = %config.node_id, "scorebook node listening (https)");
        axum_server::bind_rustls(addr, tls)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
        return Ok(());
    }

    #[cfg(not(feature = "tls"))]
    if config.tls_cert.is_some() {
        return Err("TLS requires building with the `tls` feature".into());
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, node_id = %config.node_id, "scorebook node listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
