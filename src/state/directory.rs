//! Peer Directory
//!
//! Tracks the peer nodes this node replicates to and probes, plus a
//! pointer to the node currently believed to be primary. Membership is
//! fixed at startup from configuration; only the primary pointer and
//! per-peer telemetry change at runtime.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::role::Role;

/// A known peer node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRef {
    /// Peer node identifier
    pub id: String,
    /// Peer base URL
    pub address: String,
    /// Role the peer last reported (or was configured with)
    pub last_known_role: Role,
    /// Last successful contact (not serialized)
    #[serde(skip)]
    pub last_contact: Option<Instant>,
    /// When the peer was registered
    pub registered_at: chrono::DateTime<chrono::Utc>,
}

impl PeerRef {
    fn new(id: String, address: String) -> Self {
        Self {
            id,
            address,
            last_known_role: Role::Replica,
            last_contact: None,
            registered_at: chrono::Utc::now(),
        }
    }
}

/// The node currently believed to be primary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryRef {
    pub id: String,
    pub address: String,
}

/// Directory of peers and the current primary pointer
pub struct PeerDirectory {
    /// This node's ID
    node_id: String,
    /// This node's advertised base URL
    node_address: String,
    /// Peer nodes (excluding self)
    peers: RwLock<HashMap<String, PeerRef>>,
    /// Who this node currently believes is primary (may be self)
    primary: RwLock<Option<PrimaryRef>>,
}

impl PeerDirectory {
    /// Create an empty directory for this node
    pub fn new(node_id: String, node_address: String) -> Self {
        Self {
            node_id,
            node_address,
            peers: RwLock::new(HashMap::new()),
            primary: RwLock::new(None),
        }
    }

    /// Get this node's ID
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Get this node's advertised base URL
    pub fn node_address(&self) -> &str {
        &self.node_address
    }

    /// Register a peer (startup only)
    pub async fn add_peer(&self, id: String, address: String) {
        let mut peers = self.peers.write().await;
        peers.entry(id.clone()).or_insert_with(|| PeerRef::new(id, address));
    }

    /// Get a peer by id
    pub async fn get_peer(&self, id: &str) -> Option<PeerRef> {
        self.peers.read().await.get(id).cloned()
    }

    /// Get all peers, ordered by id
    pub async fn peers(&self) -> Vec<PeerRef> {
        let peers = self.peers.read().await;
        let mut list: Vec<PeerRef> = peers.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Number of registered peers
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether any peers are registered
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Record a successful contact with a peer
    pub async fn record_contact(&self, id: &str) {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.get_mut(id) {
            peer.last_contact = Some(Instant::now());
        }
    }

    /// Record the role a peer reported
    pub async fn mark_role(&self, id: &str, role: Role) {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.get_mut(id) {
            peer.last_known_role = role;
        }
    }

    /// Point this node at a new primary (may be this node itself)
    ///
    /// Any peer previously marked primary is marked replica; the named
    /// peer, if registered, is marked primary.
    pub async fn set_primary(&self, id: &str, address: &str) {
        {
            let mut peers = self.peers.write().await;
            for peer in peers.values_mut() {
                if peer.last_known_role == Role::Primary {
                    peer.last_known_role = Role::Replica;
                }
            }
            if let Some(peer) = peers.get_mut(id) {
                peer.last_known_role = Role::Primary;
            }
        }
        let mut primary = self.primary.write().await;
        *primary = Some(PrimaryRef {
            id: id.to_string(),
            address: address.to_string(),
        });
    }

    /// Get the current primary pointer
    pub async fn primary(&self) -> Option<PrimaryRef> {
        self.primary.read().await.clone()
    }

    /// Whether this node believes itself to be the primary target
    pub async fn primary_is_self(&self) -> bool {
        self.primary
            .read()
            .await
            .as_ref()
            .map(|p| p.id == self.node_id)
            .unwrap_or(false)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_startup_registration() {
        let dir = PeerDirectory::new("node-2".into(), "http://10.0.0.2:7420".into());
        dir.add_peer("node-1".into(), "http://10.0.0.1:7420".into()).await;
        dir.add_peer("node-3".into(), "http://10.0.0.3:7420".into()).await;

        assert_eq!(dir.len().await, 2);
        let peers = dir.peers().await;
        assert_eq!(peers[0].id, "node-1");
        assert_eq!(peers[1].id, "node-3");
        assert!(peers.iter().all(|p| p.last_known_role == Role::Replica));

        // Re-adding an existing id keeps the original entry
        dir.add_peer("node-1".into(), "http://elsewhere:9999".into()).await;
        assert_eq!(dir.get_peer("node-1").await.unwrap().address, "http://10.0.0.1:7420");
    }

    #[tokio::test]
    async fn test_repoint_primary() {
        let dir = PeerDirectory::new("node-2".into(), "http://10.0.0.2:7420".into());
        dir.add_peer("node-1".into(), "http://10.0.0.1:7420".into()).await;
        dir.add_peer("node-3".into(), "http://10.0.0.3:7420".into()).await;

        dir.set_primary("node-1", "http://10.0.0.1:7420").await;
        assert_eq!(dir.primary().await.unwrap().id, "node-1");
        assert_eq!(dir.get_peer("node-1").await.unwrap().last_known_role, Role::Primary);

        // Repoint to another peer flips the old primary back to replica
        dir.set_primary("node-3", "http://10.0.0.3:7420").await;
        assert_eq!(dir.primary().await.unwrap().id, "node-3");
        assert_eq!(dir.get_peer("node-1").await.unwrap().last_known_role, Role::Replica);
        assert_eq!(dir.get_peer("node-3").await.unwrap().last_known_role, Role::Primary);
    }

    #[tokio::test]
    async fn test_primary_may_be_self() {
        let dir = PeerDirectory::new("node-1".into(), "http://10.0.0.1:7420".into());
        dir.add_peer("node-2".into(), "http://10.0.0.2:7420".into()).await;

        assert!(!dir.primary_is_self().await);
        dir.set_primary("node-1", "http://10.0.0.1:7420").await;
        assert!(dir.primary_is_self().await);
        assert_eq!(dir.len().await, 1);
    }

    #[tokio::test]
    async fn test_record_contact() {
        let dir = PeerDirectory::new("node-1".into(), "http://10.0.0.1:7420".into());
        dir.add_peer("node-2".into(), "http://10.0.0.2:7420".into()).await;

        assert!(dir.get_peer("node-2").await.unwrap().last_contact.is_none());
        dir.record_contact("node-2").await;
        assert!(dir.get_peer("node-2").await.unwrap().last_contact.is_some());
    }
}
