//! Control-plane URL resolution.
//!
//! Nodes need the externally reachable address of the control plane.  An
//! operator override wins outright.  Otherwise the mesh sidecar is polled
//! until it reports our app identity, and the URL is built from that
//! identity and the gateway domain.  Any failure degrades to
//! [`FALLBACK_URL`]; resolution never aborts startup.

use std::future::Future;
use std::time::Duration;

use log::{info, warn};
use tokio::time::sleep;

use crate::mesh::MeshMetadata;

/// Address used when auto-detection gives up.
pub const FALLBACK_URL: &str = "http://headscale:8080";

/// Port the control plane is published on behind the gateway.
const CONTROL_PLANE_PORT: u16 = 8080;

/// How hard to try reaching the mesh sidecar.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(2),
        }
    }
}

pub struct ControlPlaneLocator {
    override_url: Option<String>,
    policy: RetryPolicy,
}

impl ControlPlaneLocator {
    pub fn new(override_url: Option<String>, policy: RetryPolicy) -> Self {
        Self {
            override_url: override_url.filter(|u| !u.is_empty()),
            policy,
        }
    }

    /// Resolve the control-plane URL.
    ///
    /// Returns `None` only when `shutdown` completes before resolution does.
    pub async fn resolve<F>(&self, mesh: &dyn MeshMetadata, shutdown: F) -> Option<String>
    where
        F: Future<Output = ()>,
    {
        if let Some(url) = &self.override_url {
            info!("Using configured control plane URL");
            return Some(url.clone());
        }

        tokio::select! {
            url = self.detect(mesh) => Some(url),
            _ = shutdown => {
                warn!("Shutdown requested while resolving control plane URL");
                None
            }
        }
    }

    async fn detect(&self, mesh: &dyn MeshMetadata) -> String {
        let mut last_err = None;
        let mut app_id = None;

        for attempt in 1..=self.policy.attempts {
            match mesh.app_id().await {
                Ok(id) => {
                    app_id = Some(id);
                    break;
                }
                Err(e) => {
                    last_err = Some(e);
                    info!(
                        "Waiting for mesh metadata to be ready... ({}/{})",
                        attempt, self.policy.attempts
                    );
                    sleep(self.policy.interval).await;
                }
            }
        }

        let Some(app_id) = app_id else {
            match last_err {
                Some(e) => warn!(
                    "Failed to get app id after retries: {}, falling back to default",
                    e
                ),
                None => warn!("No attempts made to get app id, falling back to default"),
            }
            return FALLBACK_URL.to_string();
        };

        match mesh.gateway_domain().await {
            Ok(domain) => control_plane_url(&app_id, &domain),
            Err(e) => {
                warn!(
                    "Failed to get gateway domain: {}, falling back to default",
                    e
                );
                FALLBACK_URL.to_string()
            }
        }
    }
}

/// External URL of the control plane for an app behind a gateway.
pub fn control_plane_url(app_id: &str, gateway_domain: &str) -> String {
    format!(
        "https://{}-{}.{}",
        app_id, CONTROL_PLANE_PORT, gateway_domain
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshError;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Sidecar that fails `app_id` a fixed number of times first.
    struct FakeMesh {
        failures: u32,
        gateway_ok: bool,
        app_id_calls: AtomicU32,
        gateway_calls: AtomicU32,
    }

    impl FakeMesh {
        fn new(failures: u32, gateway_ok: bool) -> Self {
            Self {
                failures,
                gateway_ok,
                app_id_calls: AtomicU32::new(0),
                gateway_calls: AtomicU32::new(0),
            }
        }
    }

    fn unavailable(endpoint: &'static str) -> MeshError {
        MeshError::Status {
            endpoint,
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    #[async_trait]
    impl MeshMetadata for FakeMesh {
        async fn app_id(&self) -> Result<String, MeshError> {
            let call = self.app_id_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(unavailable("info"))
            } else {
                Ok("app42".to_string())
            }
        }

        async fn gateway_domain(&self) -> Result<String, MeshError> {
            self.gateway_calls.fetch_add(1, Ordering::SeqCst);
            if self.gateway_ok {
                Ok("gw.example.com".to_string())
            } else {
                Err(unavailable("gateway"))
            }
        }
    }

    fn never() -> std::future::Pending<()> {
        std::future::pending()
    }

    #[tokio::test]
    async fn test_override_skips_network() {
        let mesh = FakeMesh::new(0, true);
        let locator = ControlPlaneLocator::new(
            Some("https://cp.example".into()),
            RetryPolicy::default(),
        );
        let url = locator.resolve(&mesh, never()).await;
        assert_eq!(url.as_deref(), Some("https://cp.example"));
        assert_eq!(mesh.app_id_calls.load(Ordering::SeqCst), 0);
        assert_eq!(mesh.gateway_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_override_is_ignored() {
        let mesh = FakeMesh::new(0, true);
        let locator = ControlPlaneLocator::new(Some(String::new()), RetryPolicy::default());
        let url = locator.resolve(&mesh, never()).await;
        assert_eq!(url.as_deref(), Some("https://app42-8080.gw.example.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detects_after_transient_failures() {
        let mesh = FakeMesh::new(3, true);
        let locator = ControlPlaneLocator::new(None, RetryPolicy::default());
        let start = Instant::now();

        let url = locator.resolve(&mesh, never()).await;
        assert_eq!(url.as_deref(), Some("https://app42-8080.gw.example.com"));
        assert_eq!(mesh.app_id_calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_after_exhausting_attempts() {
        let mesh = FakeMesh::new(u32::MAX, true);
        let locator = ControlPlaneLocator::new(None, RetryPolicy::default());
        let start = Instant::now();

        let url = locator.resolve(&mesh, never()).await;
        assert_eq!(url.as_deref(), Some(FALLBACK_URL));
        assert_eq!(mesh.app_id_calls.load(Ordering::SeqCst), 30);
        assert_eq!(mesh.gateway_calls.load(Ordering::SeqCst), 0);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_gateway_failure_falls_back_without_retry() {
        let mesh = FakeMesh::new(0, false);
        let locator = ControlPlaneLocator::new(None, RetryPolicy::default());
        let url = locator.resolve(&mesh, never()).await;
        assert_eq!(url.as_deref(), Some(FALLBACK_URL));
        assert_eq!(mesh.gateway_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_retry_loop() {
        let mesh = FakeMesh::new(u32::MAX, true);
        let locator = ControlPlaneLocator::new(None, RetryPolicy::default());
        let shutdown = sleep(Duration::from_secs(5));

        let url = locator.resolve(&mesh, shutdown).await;
        assert_eq!(url, None);
        assert!(mesh.app_id_calls.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_url_template() {
        assert_eq!(
            control_plane_url("abc", "dstack.example.org"),
            "https://abc-8080.dstack.example.org"
        );
    }
}
