use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use mdht_core::id::ID_LEN;
use mdht_core::{Id, PeerStore, StoreError};
use tracing::{debug, warn};

/// Peer rows older than this are dropped by `evict_old_peers`.
const PEER_TTL_MILLIS: u128 = 24 * 60 * 60 * 1000;

const MAX_PEERS_PER_INFOHASH: usize = 10;

/// Separates an infohash-hex prefix from its trailing timestamp in a peer
/// key. `0xff` never appears in a lowercase-hex string, so prefix scans
/// never cross into a neighboring infohash's rows.
const KEY_SEP: u8 = 0xff;

/// Width in bytes of the `millis` timestamp suffix of a peer key.
const TS_LEN: usize = 16;
/// Width in bytes of the monotonic sequence suffix of a peer key.
const SEQ_LEN: usize = 8;

/// A `sled`-backed durable `PeerStore`, avoiding a hand-rolled storage
/// engine. Three trees: observed infohashes, per-infohash peer rows
/// (key-ordered so the newest rows sort last), and routing-table
/// snapshots keyed by owner id.
pub struct SledStore {
    infohashes: sled::Tree,
    peers: sled::Tree,
    routing: sled::Tree,
    /// Disambiguates peer rows announced in the same millisecond, across
    /// every infohash. Ordering still follows the timestamp first; this
    /// only breaks ties within one millisecond.
    peer_seq: AtomicU64,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Io(e.to_string()))?;
        Self::from_db(&db)
    }

    fn from_db(db: &sled::Db) -> Result<Self, StoreError> {
        let open = |name: &str| db.open_tree(name).map_err(|e| StoreError::Io(e.to_string()));
        Ok(SledStore {
            infohashes: open("infohashes")?,
            peers: open("peers")?,
            routing: open("routing")?,
            peer_seq: AtomicU64::new(0),
        })
    }

    /// `infohash_hex ‖ 0xff ‖ millis (16 bytes BE) ‖ seq (8 bytes BE)`. The
    /// sequence suffix guarantees distinct keys even for two peers
    /// announced under the same infohash in the same millisecond, so a
    /// same-millisecond `record_peer` never overwrites a prior row.
    fn peer_key(infohash_hex: &str, millis: u128, seq: u64) -> Vec<u8> {
        let mut key = infohash_hex.as_bytes().to_vec();
        key.push(KEY_SEP);
        key.extend_from_slice(&millis.to_be_bytes());
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn peer_key_prefix(infohash_hex: &str) -> Vec<u8> {
        let mut key = infohash_hex.as_bytes().to_vec();
        key.push(KEY_SEP);
        key
    }

    fn now_millis() -> u128 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
    }

    fn next_seq(&self) -> u64 {
        self.peer_seq.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl PeerStore for SledStore {
    async fn record_infohash(&self, infohash_hex: &str) -> Result<(), StoreError> {
        self.infohashes
            .insert(infohash_hex.as_bytes(), &[])
            .map(|_| ())
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    async fn record_peer(&self, infohash_hex: &str, compact_peer: Vec<u8>) -> Result<(), StoreError> {
        let key = Self::peer_key(infohash_hex, Self::now_millis(), self.next_seq());
        self.peers.insert(key, compact_peer).map_err(|e| StoreError::Io(e.to_string()))?;

        let prefix = Self::peer_key_prefix(infohash_hex);
        let keys: Vec<sled::IVec> =
            self.peers.scan_prefix(&prefix).keys().filter_map(Result::ok).collect();
        if keys.len() > MAX_PEERS_PER_INFOHASH {
            for stale in &keys[..keys.len() - MAX_PEERS_PER_INFOHASH] {
                if let Err(e) = self.peers.remove(stale) {
                    warn!(error = %e, "failed to trim old peer row");
                }
            }
        }
        Ok(())
    }

    async fn load_peers(&self, infohash_hex: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        let prefix = Self::peer_key_prefix(infohash_hex);
        let mut values: Vec<Vec<u8>> = self
            .peers
            .scan_prefix(&prefix)
            .values()
            .filter_map(Result::ok)
            .map(|v| v.to_vec())
            .collect();
        values.reverse();
        values.truncate(MAX_PEERS_PER_INFOHASH);
        Ok(values)
    }

    async fn evict_old_peers(&self) -> Result<(), StoreError> {
        let cutoff = Self::now_millis().saturating_sub(PEER_TTL_MILLIS);
        let mut removed = 0usize;
        for entry in self.peers.iter() {
            let (key, _) = entry.map_err(|e| StoreError::Io(e.to_string()))?;
            if key.len() < TS_LEN + SEQ_LEN {
                continue;
            }
            let ts_start = key.len() - TS_LEN - SEQ_LEN;
            let ts_bytes = &key[ts_start..ts_start + TS_LEN];
            let millis = u128::from_be_bytes(ts_bytes.try_into().unwrap());
            if millis < cutoff {
                self.peers.remove(&key).map_err(|e| StoreError::Io(e.to_string()))?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "evicted expired peer entries");
        }
        Ok(())
    }

    async fn save_routing_snapshot(&self, owner_id: Id, blob: Vec<u8>) -> Result<(), StoreError> {
        self.routing.insert(owner_id.0, blob).map(|_| ()).map_err(|e| StoreError::Io(e.to_string()))
    }

    async fn load_routing_snapshot(&self, owner_id: Id) -> Result<Option<Vec<u8>>, StoreError> {
        self.routing
            .get(owner_id.0)
            .map(|opt| opt.map(|v| v.to_vec()))
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    async fn load_all_node_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        for entry in self.routing.iter().keys() {
            let key = entry.map_err(|e| StoreError::Io(e.to_string()))?;
            if key.len() == ID_LEN {
                out.push(hex::encode(&key));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> SledStore {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledStore::from_db(&db).unwrap()
    }

    #[tokio::test]
    async fn peers_are_capped_and_most_recent_first() {
        let store = temp_store();
        for i in 0..15u8 {
            store.record_peer("deadbeef", vec![i]).await.unwrap();
        }
        let peers = store.load_peers("deadbeef").await.unwrap();
        assert_eq!(peers.len(), 10);
        assert_eq!(peers[0], vec![14]);
    }

    #[tokio::test]
    async fn same_millisecond_appends_do_not_collide() {
        let store = temp_store();
        let millis = SledStore::now_millis();
        let a = SledStore::peer_key("deadbeef", millis, store.next_seq());
        let b = SledStore::peer_key("deadbeef", millis, store.next_seq());
        assert_ne!(a, b, "two rows minted in the same millisecond must get distinct keys");

        store.peers.insert(a, vec![1]).unwrap();
        store.peers.insert(b, vec![2]).unwrap();
        let peers = store.load_peers("deadbeef").await.unwrap();
        assert_eq!(peers.len(), 2, "neither row should have overwritten the other");
    }

    #[tokio::test]
    async fn routing_snapshot_round_trips() {
        let store = temp_store();
        let id = Id::random();
        store.save_routing_snapshot(id, vec![9, 8, 7]).await.unwrap();
        assert_eq!(store.load_routing_snapshot(id).await.unwrap(), Some(vec![9, 8, 7]));
        assert_eq!(store.load_all_node_ids().await.unwrap(), vec![id.hex()]);
    }
}
