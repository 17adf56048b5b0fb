use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::broker::Broker;
use crate::config::SystemConfig;
use crate::contact::Contact;
use crate::error::TransportError;
use crate::id::Id;
use crate::search;
use crate::store::PeerStore;
use crate::transport::{UdpTransport, READ_BUF_LEN};
use crate::updater;

/// A live DHT participant: a broker plus the background tasks that keep it
/// running (one UDP reader, one updater per node); the broker itself is
/// not a separate task here, see `Broker`'s doc.
pub struct Node<S: PeerStore> {
    broker: Arc<Broker<S>>,
    reader: JoinHandle<()>,
    updater: JoinHandle<()>,
}

impl<S: PeerStore + 'static> Node<S> {
    pub async fn bind(id: Id, config: SystemConfig, store: S) -> Result<Self, TransportError> {
        let transport = UdpTransport::bind().await?;
        let broker = Arc::new(Broker::new(id, config, transport, store));

        let reader = tokio::spawn(reader_loop(broker.clone()));
        let updater = tokio::spawn(updater::run(broker.clone()));

        Ok(Node { broker, reader, updater })
    }

    pub fn id(&self) -> Id {
        self.broker.id()
    }

    pub fn broker(&self) -> &Arc<Broker<S>> {
        &self.broker
    }

    /// Snapshot of routing-table size, for a liveness/stats endpoint; not
    /// part of the wire protocol.
    pub fn stats(&self) -> NodeStats {
        let trie = self.broker.trie().lock().unwrap();
        NodeStats { id: self.id(), num_contacts: trie.len(), num_buckets: trie.num_buckets() }
    }

    /// Drives an iterative `find_node` lookup toward `target`, seeding from
    /// the trie if it has anything, or from bootstrap hosts otherwise.
    #[instrument(skip(self), fields(id = %self.id().hex()))]
    pub async fn lookup(&self, target: Id) -> Vec<Contact> {
        let seed = {
            let trie = self.broker.trie().lock().unwrap();
            trie.find_local_closest(&target)
        };
        let seed = if seed.is_empty() {
            crate::bootstrap::seed_contacts(&self.broker.config().bootstrap.hosts).await
        } else {
            seed
        };
        search::find_node(&self.broker, target, seed).await
    }

    /// Cancels both background tasks.
    pub fn shutdown(&self) {
        self.reader.abort();
        self.updater.abort();
    }
}

impl<S: PeerStore> Drop for Node<S> {
    fn drop(&mut self) {
        self.reader.abort();
        self.updater.abort();
    }
}

#[derive(Clone, Copy, Debug)]
pub struct NodeStats {
    pub id: Id,
    pub num_contacts: usize,
    pub num_buckets: usize,
}

/// The UDP reader task: loop on `recv`, decode, hand off to the broker. A
/// 30-second read deadline expiry is silently ignored.
async fn reader_loop<S: PeerStore>(broker: Arc<Broker<S>>) {
    let mut buf = [0u8; READ_BUF_LEN];
    loop {
        match broker.transport().recv(&mut buf).await {
            None => continue,
            Some((len, src)) => {
                broker.handle_datagram(&buf[..len], src).await;
                debug!(len, src = %src, "handled datagram");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::store::StoreError;

    #[derive(Default)]
    struct NullStore;

    #[async_trait]
    impl PeerStore for NullStore {
        async fn record_infohash(&self, _infohash_hex: &str) -> Result<(), StoreError> {
            Ok(())
        }
        async fn record_peer(&self, _infohash_hex: &str, _compact_peer: Vec<u8>) -> Result<(), StoreError> {
            Ok(())
        }
        async fn load_peers(&self, _infohash_hex: &str) -> Result<Vec<Vec<u8>>, StoreError> {
            Ok(Vec::new())
        }
        async fn evict_old_peers(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn save_routing_snapshot(&self, _owner_id: Id, _blob: Vec<u8>) -> Result<(), StoreError> {
            Ok(())
        }
        async fn load_routing_snapshot(&self, _owner_id: Id) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }
        async fn load_all_node_ids(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test_log::test(tokio::test)]
    async fn a_freshly_bound_node_has_an_empty_routing_table() {
        let id = Id::random();
        let node = Node::bind(id, SystemConfig::default(), NullStore).await.unwrap();
        assert_eq!(node.id(), id);
        let stats = node.stats();
        assert_eq!(stats.num_contacts, 0);
        assert_eq!(stats.num_buckets, 1);
        node.shutdown();
    }
}
