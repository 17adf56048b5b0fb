use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::Mutex;

use mdht_krpc::{Body, Envelope, PortValue, Query, TxIdGenerator};
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use crate::config::SystemConfig;
use crate::contact::{encode_contacts, encode_peer, Contact};
use crate::error::TransportError;
use crate::id::Id;
use crate::routing::RoutingTrie;
use crate::store::PeerStore;
use crate::token::TokenAuthority;
use crate::transport::UdpTransport;

/// The single point that multiplexes inbound datagrams, outbound request
/// bookkeeping, and query dispatch. All mutation of `req_map`, the token
/// authority, and the routing trie is funneled through `&self` methods
/// guarded by a private `Mutex`, rather than through a dedicated broker
/// task.
pub struct Broker<S: PeerStore> {
    id: Id,
    config: SystemConfig,
    transport: UdpTransport,
    store: S,
    txids: TxIdGenerator,
    req_map: Mutex<HashMap<Vec<u8>, oneshot::Sender<Envelope>>>,
    trie: Mutex<RoutingTrie>,
    token_auth: Mutex<TokenAuthority>,
}

impl<S: PeerStore> Broker<S> {
    pub fn new(id: Id, config: SystemConfig, transport: UdpTransport, store: S) -> Self {
        let trie = RoutingTrie::new(id, config.routing.clone());
        Broker {
            id,
            config,
            transport,
            store,
            txids: TxIdGenerator::new(),
            req_map: Mutex::new(HashMap::new()),
            trie: Mutex::new(trie),
            token_auth: Mutex::new(TokenAuthority::new()),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn transport(&self) -> &UdpTransport {
        &self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Registers a fresh outbound request, returning the txid used and a
    /// receiver that fires exactly once: on matching response, or never (the
    /// caller is expected to race this against its own timeout and call
    /// `expire` when it loses).
    pub fn register(&self) -> (Vec<u8>, oneshot::Receiver<Envelope>) {
        let txid = self.txids.next();
        let (tx, rx) = oneshot::channel();
        self.req_map.lock().unwrap().insert(txid.clone(), tx);
        (txid, rx)
    }

    /// Drops a `req_map` entry after its caller's timeout fires. A no-op if
    /// the response already arrived.
    pub fn expire(&self, txid: &[u8]) {
        self.req_map.lock().unwrap().remove(txid);
    }

    pub async fn send(&self, bytes: &[u8], addr: SocketAddrV4) -> Result<(), TransportError> {
        self.transport.send(bytes, addr).await
    }

    pub fn rotate_secret(&self) {
        self.token_auth.lock().unwrap().rotate();
    }

    pub fn trie(&self) -> &Mutex<RoutingTrie> {
        &self.trie
    }

    pub fn insert_contact(&self, contact: Contact) {
        self.trie.lock().unwrap().insert(contact);
    }

    /// Entry point for the UDP reader task: decode and route one datagram.
    /// Decode failures are logged and dropped, never fatal.
    #[instrument(skip(self, bytes), fields(src = %src))]
    pub async fn handle_datagram(&self, bytes: &[u8], src: SocketAddrV4) {
        let msg = match mdht_krpc::decode(bytes) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "dropping malformed datagram");
                return;
            }
        };

        match &msg.body {
            Body::Response { .. } | Body::Error { .. } => self.complete_request(msg),
            Body::Query { query } => {
                let query = query.clone();
                self.note_sender(&query, src);
                self.dispatch_query(msg.txid.to_vec(), query, src).await;
            }
        }
    }

    /// Matches an inbound response/error against `req_map` by txid.
    /// Unmatched responses are dropped silently; no spurious wake-up.
    fn complete_request(&self, msg: Envelope) {
        let sender = self.req_map.lock().unwrap().remove(msg.txid.as_slice());
        match sender {
            Some(sender) => {
                let _ = sender.send(msg);
            }
            None => debug!("response for unknown or already-completed txid dropped"),
        }
    }

    /// After handling any query, the source contact is inserted into the
    /// routing trie.
    fn note_sender(&self, query: &Query, src: SocketAddrV4) {
        match Id::from_slice(query.sender_id()) {
            Some(id) => self.insert_contact(Contact::new(id, src)),
            None => warn!("query carried a malformed sender id, not inserting into trie"),
        }
    }

    async fn dispatch_query(&self, txid: Vec<u8>, query: Query, src: SocketAddrV4) {
        let reply = match query {
            Query::Ping { .. } => Envelope::pong_response(txid, self.id.0),
            Query::FindNode { target, .. } => self.handle_find_node(txid, &target),
            Query::GetPeers { info_hash, .. } => self.handle_get_peers(txid, &info_hash, src).await,
            Query::AnnouncePeer { info_hash, port, implied_port, token, .. } => {
                self.handle_announce_peer(txid, &info_hash, port, implied_port, &token, src).await
            }
        };

        if let Err(e) = self.send(&mdht_krpc::encode(&reply).expect("reply always encodes"), src).await {
            debug!(error = %e, "failed to send reply");
        }
    }

    fn handle_find_node(&self, txid: Vec<u8>, target: &[u8]) -> Envelope {
        let target_id = Id::from_slice(target).unwrap_or(self.id);
        let contacts = self.trie.lock().unwrap().find_local_closest(&target_id);
        Envelope::node_result(txid, self.id.0, None, encode_contacts(&contacts))
    }

    async fn handle_get_peers(&self, txid: Vec<u8>, info_hash: &[u8], src: SocketAddrV4) -> Envelope {
        let hex = hex::encode(info_hash);
        let token = self.token_auth.lock().unwrap().mint(*src.ip()).into_bytes();

        if let Err(e) = self.store.record_infohash(&hex).await {
            warn!(error = %e, "failed to record infohash");
        }

        let peers = self.store.load_peers(&hex).await.unwrap_or_default();
        if !peers.is_empty() {
            return Envelope::peer_result(txid, self.id.0, token, peers);
        }

        let target_id = Id::from_slice(info_hash).unwrap_or(self.id);
        let contacts = self.trie.lock().unwrap().find_local_closest(&target_id);
        Envelope::node_result(txid, self.id.0, Some(token), encode_contacts(&contacts))
    }

    async fn handle_announce_peer(
        &self,
        txid: Vec<u8>,
        info_hash: &[u8],
        port: PortValue,
        implied_port: PortValue,
        token: &[u8],
        src: SocketAddrV4,
    ) -> Envelope {
        let valid = match std::str::from_utf8(token) {
            Ok(token) => self.token_auth.lock().unwrap().validate(token, *src.ip()),
            Err(_) => false,
        };

        if valid {
            let actual_port = if implied_port.0 != 0 { src.port() } else { port.as_u16().unwrap_or(0) };
            let hex = hex::encode(info_hash);
            let compact = encode_peer(&SocketAddrV4::new(*src.ip(), actual_port));
            if let Err(e) = self.store.record_peer(&hex, compact.to_vec()).await {
                warn!(error = %e, "failed to record announced peer");
            }
        } else {
            debug!("rejecting announce_peer with invalid token");
        }

        // Always acknowledge, valid or not: silently refuse, but still
        // reply, so a probe learns nothing from the difference.
        Envelope::pong_response(txid, self.id.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::net::UdpSocket;

    use super::*;
    use crate::contact::Contact;

    #[derive(Default)]
    struct FakeStore {
        peers: StdMutex<HashMap<String, Vec<Vec<u8>>>>,
        infohashes: StdMutex<HashSet<String>>,
    }

    #[async_trait]
    impl PeerStore for FakeStore {
        async fn record_infohash(&self, infohash_hex: &str) -> Result<(), crate::store::StoreError> {
            self.infohashes.lock().unwrap().insert(infohash_hex.to_string());
            Ok(())
        }

        async fn record_peer(
            &self,
            infohash_hex: &str,
            compact_peer: Vec<u8>,
        ) -> Result<(), crate::store::StoreError> {
            self.peers.lock().unwrap().entry(infohash_hex.to_string()).or_default().push(compact_peer);
            Ok(())
        }

        async fn load_peers(&self, infohash_hex: &str) -> Result<Vec<Vec<u8>>, crate::store::StoreError> {
            Ok(self.peers.lock().unwrap().get(infohash_hex).cloned().unwrap_or_default())
        }

        async fn evict_old_peers(&self) -> Result<(), crate::store::StoreError> {
            Ok(())
        }

        async fn save_routing_snapshot(&self, _owner_id: Id, _blob: Vec<u8>) -> Result<(), crate::store::StoreError> {
            Ok(())
        }

        async fn load_routing_snapshot(&self, _owner_id: Id) -> Result<Option<Vec<u8>>, crate::store::StoreError> {
            Ok(None)
        }

        async fn load_all_node_ids(&self) -> Result<Vec<String>, crate::store::StoreError> {
            Ok(Vec::new())
        }
    }

    async fn test_broker() -> (Broker<FakeStore>, Id) {
        let id = Id::random();
        let transport = UdpTransport::bind().await.unwrap();
        (Broker::new(id, SystemConfig::default(), transport, FakeStore::default()), id)
    }

    fn as_v4(addr: SocketAddr) -> SocketAddrV4 {
        match addr {
            SocketAddr::V4(a) => a,
            SocketAddr::V6(_) => panic!("expected an IPv4 address"),
        }
    }

    async fn recv_envelope(probe: &UdpSocket) -> Envelope {
        let mut buf = [0u8; 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), probe.recv_from(&mut buf))
            .await
            .expect("reply did not arrive in time")
            .unwrap();
        mdht_krpc::decode(&buf[..len]).unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn ping_query_is_answered_with_pong_and_sender_is_learned() {
        let (broker, id) = test_broker().await;
        let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let probe_addr = as_v4(probe.local_addr().unwrap());

        let sender_id = Id::random();
        let query = Envelope::ping_query(vec![0, 1], sender_id.0);
        broker.handle_datagram(&mdht_krpc::encode(&query).unwrap(), probe_addr).await;

        let reply = recv_envelope(&probe).await;
        assert_eq!(reply.txid.as_slice(), &[0, 1]);
        match reply.body {
            Body::Response { r } => assert_eq!(r.id.as_slice(), &id.0),
            other => panic!("expected a pong, got {other:?}"),
        }
        assert_eq!(broker.trie().lock().unwrap().len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn find_node_query_returns_locally_known_contacts() {
        let (broker, _) = test_broker().await;
        let target = Id::random();
        let known = Contact::new(Id::random(), SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 6881));
        broker.insert_contact(known.clone());

        let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let probe_addr = as_v4(probe.local_addr().unwrap());
        let query = Envelope::find_node_query(vec![5], Id::random().0, target.0);
        broker.handle_datagram(&mdht_krpc::encode(&query).unwrap(), probe_addr).await;

        let reply = recv_envelope(&probe).await;
        match reply.body {
            Body::Response { r } => {
                let nodes = r.nodes.expect("find_node reply must carry nodes");
                let contacts = crate::contact::decode_contacts(nodes.as_slice());
                assert!(contacts.iter().any(|c| c.id == known.id));
            }
            other => panic!("expected a node_result, got {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn announce_peer_requires_a_token_minted_for_the_same_ip() {
        let (broker, _) = test_broker().await;
        let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let probe_addr = as_v4(probe.local_addr().unwrap());
        let info_hash = Id::random();

        let get_peers = Envelope::get_peers_query(vec![1], Id::random().0, info_hash.0);
        broker.handle_datagram(&mdht_krpc::encode(&get_peers).unwrap(), probe_addr).await;
        let token = match recv_envelope(&probe).await.body {
            Body::Response { r } => r.token.expect("get_peers reply must carry a token").into_vec(),
            other => panic!("expected a node_result, got {other:?}"),
        };

        let announce = Envelope::announce_peer_query(
            vec![2],
            Id::random().0,
            info_hash.0,
            6881,
            false,
            token,
        );
        broker.handle_datagram(&mdht_krpc::encode(&announce).unwrap(), probe_addr).await;
        recv_envelope(&probe).await;

        let stored = broker.store().load_peers(&hex::encode(info_hash.0)).await.unwrap();
        assert_eq!(stored.len(), 1);

        let bogus = Envelope::announce_peer_query(vec![3], Id::random().0, info_hash.0, 6881, false, b"bogus".to_vec());
        broker.handle_datagram(&mdht_krpc::encode(&bogus).unwrap(), probe_addr).await;
        recv_envelope(&probe).await;

        let stored = broker.store().load_peers(&hex::encode(info_hash.0)).await.unwrap();
        assert_eq!(stored.len(), 1, "an invalid token must not add a second peer entry");
    }

    #[test_log::test(tokio::test)]
    async fn response_to_an_unknown_txid_is_dropped_without_panicking() {
        let (broker, _) = test_broker().await;
        let unmatched = Envelope::pong_response(vec![9, 9], Id::random().0);
        let src = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6881);
        broker.handle_datagram(&mdht_krpc::encode(&unmatched).unwrap(), src).await;
    }
}
