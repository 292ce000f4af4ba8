//! Fleet bootstrap coordinator entry point.

use std::sync::Arc;

use log::info;

mod auth;
mod config;
mod issuer;
mod locator;
mod mesh;
mod registry;
mod secret;
mod server;
mod types;

use auth::AllowList;
use config::Config;
use issuer::HeadscaleClient;
use locator::{ControlPlaneLocator, RetryPolicy};
use mesh::DstackMeshClient;
use registry::NodeRegistry;
use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting fleetd with config: {:?}", cfg);

    let shared_key = secret::load_or_create(&cfg.shared_key_path);

    // Blocks until the mesh sidecar answers or the retry budget runs out
    let mesh = DstackMeshClient::new(&cfg.mesh_url);
    let locator = ControlPlaneLocator::new(cfg.server_url.clone(), RetryPolicy::default());
    let Some(server_url) = locator.resolve(&mesh, server::shutdown_signal()).await else {
        info!("Shutdown complete.");
        return Ok(());
    };
    info!("Using control plane URL: {}", server_url);

    let issuer = HeadscaleClient::new(
        &cfg.control_plane_url,
        cfg.control_plane_api_key.clone(),
        &cfg.preauth_user,
    );
    let allowlist = Arc::new(AllowList::parse(&cfg.allowed_apps));
    info!("API server starting with allowed apps: {:?}", allowlist.entries());

    let state = Arc::new(AppState {
        registry: Arc::new(NodeRegistry::new()),
        issuer: Arc::new(issuer),
        shared_key,
        server_url,
        discovery_ports: cfg.discovery_ports.clone(),
    });

    server::run(cfg.port, state, allowlist).await?;

    info!("Shutdown complete.");
    Ok(())
}
