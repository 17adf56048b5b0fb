use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mdht_core::{Id, PeerStore, StoreError};
use tracing::info;

/// Peer rows older than this are dropped by `evict_old_peers`.
const PEER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Most-recent-first, capped at this many rows per infohash.
const MAX_PEERS_PER_INFOHASH: usize = 10;

#[derive(Default)]
struct Inner {
    infohashes: std::collections::HashSet<String>,
    /// Newest entry last; `load_peers` reverses before returning.
    peers: HashMap<String, Vec<(Instant, Vec<u8>)>>,
    routing_snapshots: HashMap<Id, Vec<u8>>,
}

/// A `HashMap`-backed `PeerStore`: a plain map plus a periodic sweep for
/// expiry. The default store, and the one tests use.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PeerStore for InMemoryStore {
    async fn record_infohash(&self, infohash_hex: &str) -> Result<(), StoreError> {
        self.inner.lock().unwrap().infohashes.insert(infohash_hex.to_string());
        Ok(())
    }

    async fn record_peer(&self, infohash_hex: &str, compact_peer: Vec<u8>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let entries = inner.peers.entry(infohash_hex.to_string()).or_default();
        entries.push((Instant::now(), compact_peer));
        if entries.len() > MAX_PEERS_PER_INFOHASH {
            let drop_count = entries.len() - MAX_PEERS_PER_INFOHASH;
            entries.drain(0..drop_count);
        }
        Ok(())
    }

    async fn load_peers(&self, infohash_hex: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<Vec<u8>> = inner
            .peers
            .get(infohash_hex)
            .map(|entries| entries.iter().map(|(_, data)| data.clone()).collect())
            .unwrap_or_default();
        out.reverse();
        out.truncate(MAX_PEERS_PER_INFOHASH);
        Ok(out)
    }

    async fn evict_old_peers(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let mut removed = 0usize;
        for entries in inner.peers.values_mut() {
            let before = entries.len();
            entries.retain(|(at, _)| now.duration_since(*at) < PEER_TTL);
            removed += before - entries.len();
        }
        if removed > 0 {
            info!(removed, "evicted expired peer entries");
        }
        Ok(())
    }

    async fn save_routing_snapshot(&self, owner_id: Id, blob: Vec<u8>) -> Result<(), StoreError> {
        self.inner.lock().unwrap().routing_snapshots.insert(owner_id, blob);
        Ok(())
    }

    async fn load_routing_snapshot(&self, owner_id: Id) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.lock().unwrap().routing_snapshots.get(&owner_id).cloned())
    }

    async fn load_all_node_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.lock().unwrap().routing_snapshots.keys().map(|id| id.hex()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn peers_are_capped_and_most_recent_first() {
        let store = InMemoryStore::new();
        for i in 0..15u8 {
            store.record_peer("deadbeef", vec![i]).await.unwrap();
        }
        let peers = store.load_peers("deadbeef").await.unwrap();
        assert_eq!(peers.len(), 10);
        assert_eq!(peers[0], vec![14]);
        assert_eq!(peers[9], vec![5]);
    }

    #[tokio::test]
    async fn routing_snapshot_round_trips() {
        let store = InMemoryStore::new();
        let id = Id::random();
        store.save_routing_snapshot(id, vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.load_routing_snapshot(id).await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(store.load_all_node_ids().await.unwrap(), vec![id.hex()]);
    }

    #[tokio::test]
    async fn infohash_record_is_idempotent() {
        let store = InMemoryStore::new();
        store.record_infohash("abc").await.unwrap();
        store.record_infohash("abc").await.unwrap();
        assert_eq!(store.inner.lock().unwrap().infohashes.len(), 1);
    }
}
