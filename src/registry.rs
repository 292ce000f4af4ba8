//! In-memory node registry.
//!
//! The registry is the only shared mutable state in the service.  It owns
//! its map behind an async reader/writer lock: list and role queries share
//! the lock, register and update take it exclusively.  Every critical
//! section is a single map lookup plus mutation; callers do any network
//! work before reaching the registry.  Nothing is persisted, a restart
//! starts from an empty map.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use log::debug;
use tokio::sync::RwLock;

use crate::types::{NodeDescriptor, NodeUpdate, UpsertOutcome};

#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, NodeDescriptor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a registration.
    ///
    /// Unseen ids get a fresh descriptor.  Known ids keep everything they
    /// have learned; a supplied name is only adopted if the node never had
    /// one of its own.
    pub async fn upsert_on_register(&self, id: &str, name: Option<&str>) -> NodeDescriptor {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .entry(id.to_string())
            .or_insert_with(|| NodeDescriptor::new(id, name));

        if let Some(name) = name.filter(|n| !n.is_empty()) {
            if !node.name_supplied {
                node.display_name = name.to_string();
                node.name_supplied = true;
            }
        }

        node.clone()
    }

    /// Record a node's self-reported details, creating the entry if needed.
    pub async fn upsert_on_update(
        &self,
        id: &str,
        update: &NodeUpdate,
    ) -> (NodeDescriptor, UpsertOutcome) {
        let mut nodes = self.nodes.write().await;
        let (node, outcome) = match nodes.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().apply(update);
                (entry.get().clone(), UpsertOutcome::Updated)
            }
            Entry::Vacant(entry) => {
                let mut node = NodeDescriptor::new(id, None);
                node.apply(update);
                (entry.insert(node).clone(), UpsertOutcome::Created)
            }
        };
        drop(nodes);

        debug!("Upserted node {} ({:?})", id, outcome);
        (node, outcome)
    }

    /// All nodes whose role matches exactly, in no particular order.
    pub async fn query_by_role(&self, role: &str) -> Vec<NodeDescriptor> {
        let nodes = self.nodes.read().await;
        nodes.values().filter(|n| n.role == role).cloned().collect()
    }

    /// Snapshot of every known node.
    pub async fn list_all(&self) -> Vec<NodeDescriptor> {
        let nodes = self.nodes.read().await;
        nodes.values().cloned().collect()
    }
}
