//! Bootstrap and discovery HTTP API.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::auth::{self, AllowList};
use crate::issuer::KeyIssuer;
use crate::registry::NodeRegistry;
use crate::secret::SharedSecret;
use crate::types::{BootstrapResponse, NodeDescriptor, NodeUpdate, UpsertOutcome};

pub struct AppState {
    pub registry: Arc<NodeRegistry>,
    pub issuer: Arc<dyn KeyIssuer>,
    pub shared_key: SharedSecret,
    pub server_url: String,
    /// Service port appended to discovered hostnames, per role.
    pub discovery_ports: HashMap<String, u16>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub struct ApiError(pub StatusCode, pub Json<ErrorResponse>);

impl ApiError {
    fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        ApiError(status, Json(ErrorResponse { error: msg.into() }))
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

pub fn create_router(state: Arc<AppState>, allowlist: Arc<AllowList>) -> Router {
    Router::new()
        .route("/api/register", get(register))
        .route("/api/nodes/update", post(update_node))
        .route("/api/nodes", get(list_nodes))
        .route("/api/discover/:role", get(discover))
        .with_state(state)
        .layer(middleware::from_fn_with_state(allowlist, auth::require_app_id))
        // added after the auth layer so probes need no identity
        .route("/health", get(health))
}

pub async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
pub struct RegisterParams {
    instance_id: Option<String>,
    node_name: Option<String>,
}

/// Hand a new node its join key, the shared secret and the control plane URL.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RegisterParams>,
) -> Result<Json<BootstrapResponse>, ApiError> {
    let id = non_empty(params.instance_id)
        .ok_or_else(|| ApiError::bad_request("Missing required parameters"))?;
    let name = non_empty(params.node_name);

    // minted before touching the registry so no lock is held across the call
    let pre_auth_key = state.issuer.mint_join_key().await.map_err(|e| {
        error!("Failed to generate pre-auth key for {}: {}", id, e);
        ApiError::internal_error("Failed to generate pre-auth key")
    })?;

    let node = state.registry.upsert_on_register(&id, name.as_deref()).await;
    info!("Bootstrap request from {} ({})", node.display_name, node.id);

    Ok(Json(BootstrapResponse {
        pre_auth_key,
        shared_key: state.shared_key.as_str().to_string(),
        server_url: state.server_url.clone(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateParams {
    uuid: Option<String>,
    node_type: Option<String>,
    tailscale_ip: Option<String>,
    hostname: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub status: UpsertOutcome,
}

/// Record what a node reports about itself after joining the overlay.
pub async fn update_node(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UpdateParams>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let id = non_empty(params.uuid)
        .ok_or_else(|| ApiError::bad_request("uuid parameter is required"))?;
    let update = NodeUpdate {
        role: non_empty(params.node_type),
        overlay_address: non_empty(params.tailscale_ip),
        hostname: non_empty(params.hostname),
    };

    let (node, outcome) = state.registry.upsert_on_update(&id, &update).await;
    info!(
        "{:?} node {}: type={}, hostname={}",
        outcome,
        node.id,
        node.role,
        node.hostname.as_deref().unwrap_or("")
    );

    Ok(Json(UpdateResponse { status: outcome }))
}

/// Hosts of every node with the given role that has reported a hostname.
pub async fn discover(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let port = state.discovery_ports.get(&role).copied();
    let hosts: Vec<String> = state
        .registry
        .query_by_role(&role)
        .await
        .into_iter()
        .filter(NodeDescriptor::has_hostname)
        .filter_map(|node| node.hostname)
        .map(|host| match port {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        })
        .collect();

    if hosts.is_empty() {
        debug!("{} discovery found no nodes", role);
        return Err(ApiError::not_found(format!("No {} nodes found", role)));
    }

    info!("{} discovery request returned {} nodes", role, hosts.len());
    let count = hosts.len();
    let mut body = serde_json::Map::new();
    body.insert(format!("{}_hosts", role), hosts.into());
    body.insert("count".into(), count.into());
    Ok(Json(body.into()))
}

#[derive(Debug, Serialize)]
pub struct NodesResponse {
    pub nodes: Vec<NodeDescriptor>,
    pub count: usize,
}

/// Full registry snapshot, for inspection.
pub async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<NodesResponse> {
    let nodes = state.registry.list_all().await;
    let count = nodes.len();
    Json(NodesResponse { nodes, count })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

pub async fn run(
    port: u16,
    state: Arc<AppState>,
    allowlist: Arc<AllowList>,
) -> anyhow::Result<()> {
    let app = create_router(state, allowlist);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(e) => {
                error!("Unable to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM, shutting down...");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
