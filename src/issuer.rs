//! Join key issuance against the overlay control plane.
//!
//! Each call mints exactly one key: the configured user is looked up by
//! name, then a reusable, non-ephemeral pre-auth key valid for 24 hours is
//! requested for it.  No retries happen here.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use log::{debug, error};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifetime of a freshly minted join key.
const KEY_TTL_HOURS: i64 = 24;

#[derive(Error, Debug)]
pub enum IssuerError {
    #[error("control plane API key is not set")]
    MissingApiKey,
    #[error("control plane request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("control plane returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to decode control plane response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("user {0} not found")]
    UserNotFound(String),
    #[error("received empty pre-auth key")]
    EmptyKey,
}

#[async_trait]
pub trait KeyIssuer: Send + Sync {
    /// Mint a new join key for one bootstrapping node.
    async fn mint_join_key(&self) -> Result<String, IssuerError>;
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Serialize)]
struct PreAuthKeyRequest<'a> {
    user: &'a str,
    reusable: bool,
    ephemeral: bool,
    expiration: String,
}

#[derive(Debug, Deserialize)]
struct PreAuthKeyData {
    #[serde(default)]
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreAuthKeyResponse {
    pre_auth_key: PreAuthKeyData,
}

/// Client for the control plane's v1 REST API.
pub struct HeadscaleClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    user: String,
}

impl HeadscaleClient {
    pub fn new(base_url: &str, api_key: Option<String>, user: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            user: user.to_string(),
        }
    }

    fn api_key(&self) -> Result<&str, IssuerError> {
        self.api_key.as_deref().ok_or(IssuerError::MissingApiKey)
    }

    /// Send an authenticated request and return the body of a 2xx response.
    async fn send(&self, request: RequestBuilder) -> Result<String, IssuerError> {
        let response = request.bearer_auth(self.api_key()?).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(IssuerError::Status { status, body });
        }
        Ok(body)
    }

    /// Id of the user called `name`.
    pub async fn user_id(&self, name: &str) -> Result<String, IssuerError> {
        let url = format!("{}/api/v1/user", self.base_url);
        let body = self.send(self.client.get(&url)).await?;
        let users: UsersResponse = serde_json::from_str(&body)?;

        users
            .users
            .into_iter()
            .find(|u| u.name == name)
            .map(|u| u.id)
            .ok_or_else(|| IssuerError::UserNotFound(name.to_string()))
    }

    pub async fn create_pre_auth_key(&self, user_id: &str) -> Result<String, IssuerError> {
        let url = format!("{}/api/v1/preauthkey", self.base_url);
        let expiration = (Utc::now() + chrono::Duration::hours(KEY_TTL_HOURS))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let request = PreAuthKeyRequest {
            user: user_id,
            reusable: true,
            ephemeral: false,
            expiration,
        };

        let body = match self.send(self.client.post(&url).json(&request)).await {
            Ok(body) => body,
            Err(e) => {
                error!("Pre-auth key creation failed: {}", e);
                return Err(e);
            }
        };
        debug!("Pre-auth key API responded with {} bytes", body.len());

        let response: PreAuthKeyResponse = serde_json::from_str(&body)?;
        if response.pre_auth_key.key.is_empty() {
            return Err(IssuerError::EmptyKey);
        }
        Ok(response.pre_auth_key.key)
    }
}

#[async_trait]
impl KeyIssuer for HeadscaleClient {
    async fn mint_join_key(&self) -> Result<String, IssuerError> {
        self.api_key()?;
        let user_id = self.user_id(&self.user).await?;
        self.create_pre_auth_key(&user_id).await
    }
}
