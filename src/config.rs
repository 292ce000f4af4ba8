use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Environment names used by existing deployments, and the keys they set.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("dstack_mesh_url", "mesh_url"),
    ("headscale_internal_url", "control_plane_url"),
    ("headscale_api_key", "control_plane_api_key"),
    ("vpc_server_url", "server_url"),
    ("allowed_apps", "allowed_apps"),
    ("port", "port"),
];

#[derive(Clone, Deserialize, Serialize)]
pub struct Config {
    /// Base URL of the mesh metadata sidecar.
    pub mesh_url: String,
    /// Internal base URL of the control plane API.
    pub control_plane_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane_api_key: Option<String>,
    /// Externally reachable control plane URL, skipping auto-detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    pub allowed_apps: String,
    pub port: u16,
    pub shared_key_path: PathBuf,
    pub preauth_user: String,
    pub discovery_ports: HashMap<String, u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mesh_url: String::new(),
            control_plane_url: String::new(),
            control_plane_api_key: None,
            server_url: None,
            allowed_apps: String::new(),
            port: 8000,
            shared_key_path: PathBuf::from("/data/shared_key"),
            preauth_user: "default".into(),
            discovery_ports: HashMap::from([("etcd".to_string(), 2379)]),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("mesh_url", &self.mesh_url)
            .field("control_plane_url", &self.control_plane_url)
            .field(
                "control_plane_api_key",
                &self.control_plane_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("server_url", &self.server_url)
            .field("allowed_apps", &self.allowed_apps)
            .field("port", &self.port)
            .field("shared_key_path", &self.shared_key_path)
            .field("preauth_user", &self.preauth_user)
            .field("discovery_ports", &self.discovery_ports)
            .finish()
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("fleetd.toml"))
            .merge(Json::file("fleetd.json"))
            .merge(
                Env::raw()
                    .only(&LEGACY_ENV.iter().map(|(env, _)| *env).collect::<Vec<_>>())
                    .map(|key| legacy_key(key.as_str()).into()),
            )
            // prefixed names win over the unprefixed legacy ones
            .merge(Env::prefixed("FLEETD_"));

        let mut config = Self::from_figment(figment)?;

        // Support Docker-style secrets
        if let Ok(key_file) = std::env::var("FLEETD_CONTROL_PLANE_API_KEY_FILE") {
            config.control_plane_api_key =
                Some(std::fs::read_to_string(key_file)?.trim().to_string());
        }

        Ok(config)
    }

    /// Extract and validate a config from an already layered figment.
    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        if config.mesh_url.is_empty() {
            anyhow::bail!("mesh_url is not set (DSTACK_MESH_URL)");
        }
        if config.control_plane_url.is_empty() {
            anyhow::bail!("control_plane_url is not set (HEADSCALE_INTERNAL_URL)");
        }

        Ok(config)
    }
}

fn legacy_key(env: &str) -> String {
    let env = env.to_ascii_lowercase();
    LEGACY_ENV
        .iter()
        .find(|(name, _)| *name == env)
        .map(|(_, key)| key.to_string())
        .unwrap_or(env)
}
