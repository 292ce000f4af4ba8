//! Data structures shared by the registry and the HTTP layer.
//!
//! These types are serialised using [`serde`](https://serde.rs/) and
//! returned to nodes over the bootstrap API.  The JSON field names are
//! kept stable (`uuid`, `node_type`, `tailscale_ip`, ...) because nodes
//! already in the field parse them.

use serde::{Deserialize, Serialize};

/// One mesh participant as known to the registry.
///
/// `id` is caller supplied and never changes once the descriptor exists.
/// `role`, `overlay_address` and `hostname` are learned from update calls
/// after the node has joined the overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "node_type")]
    pub role: String,
    #[serde(rename = "tailscale_ip")]
    pub overlay_address: Option<String>,
    #[serde(rename = "actual_hostname")]
    pub hostname: Option<String>,
    /// Whether `display_name` came from a caller rather than the default.
    #[serde(skip)]
    pub(crate) name_supplied: bool,
}

impl NodeDescriptor {
    /// A fresh descriptor with nothing learned yet.
    pub fn new(id: &str, name: Option<&str>) -> Self {
        let supplied = name.filter(|n| !n.is_empty());
        Self {
            id: id.to_string(),
            display_name: supplied
                .map(str::to_string)
                .unwrap_or_else(|| default_display_name(id)),
            role: String::new(),
            overlay_address: None,
            hostname: None,
            name_supplied: supplied.is_some(),
        }
    }

    /// Apply an update using the sticky-field rule: only present,
    /// non-empty values replace what is stored.
    pub fn apply(&mut self, update: &NodeUpdate) {
        if let Some(role) = merge_field(Some(self.role.clone()), update.role.clone()) {
            self.role = role;
        }
        self.overlay_address =
            merge_field(self.overlay_address.take(), update.overlay_address.clone());
        self.hostname = merge_field(self.hostname.take(), update.hostname.clone());
    }

    /// Whether the node has reported a usable hostname.
    pub fn has_hostname(&self) -> bool {
        self.hostname.as_deref().is_some_and(|h| !h.is_empty())
    }
}

/// Name given to nodes that registered without one.
pub fn default_display_name(id: &str) -> String {
    format!("node-{}", id)
}

/// Three-way merge for optional node fields.
///
/// Keeps `existing` unless `incoming` is present and non-empty.
pub fn merge_field(existing: Option<String>, incoming: Option<String>) -> Option<String> {
    match incoming {
        Some(value) if !value.is_empty() => Some(value),
        _ => existing,
    }
}

/// Fields a node may report about itself after joining.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeUpdate {
    pub role: Option<String>,
    pub overlay_address: Option<String>,
    pub hostname: Option<String>,
}

/// Whether an upsert created the entry or changed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Credentials handed to a node on registration.  Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapResponse {
    pub pre_auth_key: String,
    pub shared_key: String,
    pub server_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_existing_when_incoming_absent_or_empty() {
        let existing = Some("10.0.0.1".to_string());
        assert_eq!(merge_field(existing.clone(), None), existing);
        assert_eq!(merge_field(existing.clone(), Some(String::new())), existing);
    }

    #[test]
    fn test_merge_takes_non_empty_incoming() {
        assert_eq!(
            merge_field(Some("old".into()), Some("new".into())),
            Some("new".to_string())
        );
        assert_eq!(merge_field(None, Some("new".into())), Some("new".to_string()));
        assert_eq!(merge_field(None, None), None);
    }

    #[test]
    fn test_new_descriptor_uses_default_name() {
        let node = NodeDescriptor::new("abc123", None);
        assert_eq!(node.display_name, "node-abc123");
        assert!(!node.name_supplied);

        let node = NodeDescriptor::new("abc123", Some(""));
        assert_eq!(node.display_name, "node-abc123");

        let node = NodeDescriptor::new("abc123", Some("worker1"));
        assert_eq!(node.display_name, "worker1");
        assert!(node.name_supplied);
        assert!(node.role.is_empty());
        assert!(node.overlay_address.is_none());
        assert!(node.hostname.is_none());
    }

    #[test]
    fn test_apply_is_sticky() {
        let mut node = NodeDescriptor::new("n1", None);
        node.apply(&NodeUpdate {
            role: Some("etcd".into()),
            overlay_address: Some("100.64.0.2".into()),
            hostname: Some("h1".into()),
        });
        node.apply(&NodeUpdate {
            role: Some(String::new()),
            overlay_address: None,
            hostname: Some("h2".into()),
        });
        assert_eq!(node.role, "etcd");
        assert_eq!(node.overlay_address.as_deref(), Some("100.64.0.2"));
        assert_eq!(node.hostname.as_deref(), Some("h2"));
    }

    #[test]
    fn test_descriptor_wire_format() {
        let mut node = NodeDescriptor::new("abc123", Some("worker1"));
        node.hostname = Some("h1".into());
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "uuid": "abc123",
                "name": "worker1",
                "node_type": "",
                "tailscale_ip": null,
                "actual_hostname": "h1",
            })
        );
    }
}
