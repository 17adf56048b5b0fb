use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::id::Id;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backing store I/O error: {0}")]
    Io(String),
    #[error("backing store serialization error: {0}")]
    Serialization(String),
}

/// The narrow persistence interface the core depends on. The core never
/// owns a concrete implementation; it is injected at construction, so
/// tests can hand in an in-memory fake.
#[async_trait]
pub trait PeerStore: Send + Sync {
    /// Idempotent upsert of an observed infohash.
    async fn record_infohash(&self, infohash_hex: &str) -> Result<(), StoreError>;

    /// Appends one compact peer entry (6 bytes) under an infohash.
    async fn record_peer(&self, infohash_hex: &str, compact_peer: Vec<u8>) -> Result<(), StoreError>;

    /// Most-recent-first, capped at 10 entries.
    async fn load_peers(&self, infohash_hex: &str) -> Result<Vec<Vec<u8>>, StoreError>;

    /// Drops peer rows older than 1 day.
    async fn evict_old_peers(&self) -> Result<(), StoreError>;

    async fn save_routing_snapshot(&self, owner_id: Id, blob: Vec<u8>) -> Result<(), StoreError>;

    async fn load_routing_snapshot(&self, owner_id: Id) -> Result<Option<Vec<u8>>, StoreError>;

    /// Enumerates every node identity the store has ever persisted a
    /// snapshot for, used by the process entry point to resume nodes
    /// across restarts.
    async fn load_all_node_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// Lets an `Arc<dyn PeerStore>` stand in for `S: PeerStore` directly,
/// mirroring the `Arc<T: TransportListener>` forwarding impl this codebase
/// already uses elsewhere. The process binary picks one concrete store at
/// startup and shares it across every node without making `Node` generic
/// over a trait object everywhere it's used.
#[async_trait]
impl<T: PeerStore + ?Sized> PeerStore for Arc<T> {
    async fn record_infohash(&self, infohash_hex: &str) -> Result<(), StoreError> {
        (**self).record_infohash(infohash_hex).await
    }

    async fn record_peer(&self, infohash_hex: &str, compact_peer: Vec<u8>) -> Result<(), StoreError> {
        (**self).record_peer(infohash_hex, compact_peer).await
    }

    async fn load_peers(&self, infohash_hex: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        (**self).load_peers(infohash_hex).await
    }

    async fn evict_old_peers(&self) -> Result<(), StoreError> {
        (**self).evict_old_peers().await
    }

    async fn save_routing_snapshot(&self, owner_id: Id, blob: Vec<u8>) -> Result<(), StoreError> {
        (**self).save_routing_snapshot(owner_id, blob).await
    }

    async fn load_routing_snapshot(&self, owner_id: Id) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).load_routing_snapshot(owner_id).await
    }

    async fn load_all_node_ids(&self) -> Result<Vec<String>, StoreError> {
        (**self).load_all_node_ids().await
    }
}
