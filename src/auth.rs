//! Caller authentication.
//!
//! Requests carry the caller's application identity in a header set by the
//! mesh sidecar.  Only identities on the allow-list get through; the
//! wildcard entry `any` admits every identified caller.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use log::{debug, warn};

use crate::server::ApiError;

/// Header carrying the caller's application identity.
pub const APP_ID_HEADER: &str = "x-dstack-app-id";

/// Allow-list entry matching every caller.
pub const WILDCARD: &str = "any";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    apps: Vec<String>,
}

impl AllowList {
    /// Parse a comma-separated list, trimming whitespace and dropping empty
    /// entries.  An empty string allows nobody.
    pub fn parse(raw: &str) -> Self {
        let apps = raw
            .split(',')
            .map(str::trim)
            .filter(|app| !app.is_empty())
            .map(str::to_string)
            .collect();
        Self { apps }
    }

    pub fn is_allowed(&self, app_id: &str) -> bool {
        self.apps.iter().any(|a| a == WILDCARD || a == app_id)
    }

    pub fn entries(&self) -> &[String] {
        &self.apps
    }
}

/// Reject callers without an allowed identity before any handler runs.
pub async fn require_app_id(
    State(allowlist): State<Arc<AllowList>>,
    request: Request,
    next: Next,
) -> Response {
    let app_id = request
        .headers()
        .get(APP_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    match app_id {
        None => {
            debug!("Rejected {} without {} header", request.uri().path(), APP_ID_HEADER);
            ApiError::unauthorized("Unauthorized").into_response()
        }
        Some(app_id) if !allowlist.is_allowed(&app_id) => {
            warn!("Rejected {} from app {}", request.uri().path(), app_id);
            ApiError::forbidden("Forbidden").into_response()
        }
        Some(_) => next.run(request).await,
    }
}
