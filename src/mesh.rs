//! Mesh metadata service client.
//!
//! The locator only needs two facts from the mesh sidecar: the identity of
//! the application this coordinator runs as, and the gateway domain of the
//! deployment.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("mesh metadata request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("mesh metadata {endpoint} returned status {status}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
    },
    #[error("mesh metadata {0} returned an empty value")]
    Empty(&'static str),
}

#[async_trait]
pub trait MeshMetadata: Send + Sync {
    /// Identity of the application this process runs as.
    async fn app_id(&self) -> Result<String, MeshError>;

    /// Gateway domain nodes use to reach this deployment from outside.
    async fn gateway_domain(&self) -> Result<String, MeshError>;
}

#[derive(Debug, Deserialize)]
struct AppInfo {
    app_id: String,
}

#[derive(Debug, Deserialize)]
struct GatewayInfo {
    gateway_domain: String,
}

pub struct DstackMeshClient {
    client: Client,
    base_url: String,
}

impl DstackMeshClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &'static str,
    ) -> Result<T, MeshError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(MeshError::Status {
                endpoint,
                status: response.status(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl MeshMetadata for DstackMeshClient {
    async fn app_id(&self) -> Result<String, MeshError> {
        let info: AppInfo = self.fetch("info").await?;
        if info.app_id.is_empty() {
            return Err(MeshError::Empty("info"));
        }
        Ok(info.app_id)
    }

    async fn gateway_domain(&self) -> Result<String, MeshError> {
        let info: GatewayInfo = self.fetch("gateway").await?;
        if info.gateway_domain.is_empty() {
            return Err(MeshError::Empty("gateway"));
        }
        Ok(info.gateway_domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_reads_app_id_and_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "app_id": "a1b2" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gateway"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({ "gateway_domain": "gw.example.com" }),
            ))
            .mount(&server)
            .await;

        let client = DstackMeshClient::new(&format!("{}/", server.uri()));
        assert_eq!(client.app_id().await.unwrap(), "a1b2");
        assert_eq!(client.gateway_domain().await.unwrap(), "gw.example.com");
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = DstackMeshClient::new(&server.uri());
        match client.app_id().await {
            Err(MeshError::Status { endpoint, status }) => {
                assert_eq!(endpoint, "info");
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gateway"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = DstackMeshClient::new(&server.uri());
        assert!(matches!(
            client.gateway_domain().await,
            Err(MeshError::Request(_))
        ));
    }
}
