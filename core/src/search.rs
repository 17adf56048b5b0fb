use std::collections::HashMap;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use mdht_krpc::{Body, Envelope};
use tracing::{debug, instrument, warn};

use crate::contact::{decode_contacts, Contact};
use crate::id::Id;
use crate::store::PeerStore;
use crate::Broker;

/// `1` once a `find_node` has been sent, `2` once its response has arrived.
/// A contact with both bits set has been fully round-tripped.
const SENT: u8 = 1;
const RECEIVED: u8 = 2;

/// Top `2*K` positions considered for the convergence test.
const CONVERGENCE_WINDOW: usize = 16;

/// One iterative `find_node` lookup toward `target`, scoped to a single
/// call.
struct SearchQueue {
    target: Id,
    visited: HashMap<String, u8>,
    /// Kept sorted ascending by XOR distance to `target`.
    results: Vec<Contact>,
}

impl SearchQueue {
    fn new(target: Id, seed: Vec<Contact>) -> Self {
        let mut q = SearchQueue { target, visited: HashMap::new(), results: Vec::new() };
        for c in seed {
            q.merge(c);
        }
        q
    }

    /// Inserts a newly discovered contact if it isn't a duplicate (by
    /// id-hex) and isn't the target itself.
    fn merge(&mut self, c: Contact) {
        if c.id == self.target {
            return;
        }
        let hex = c.id.hex();
        if self.visited.contains_key(&hex) {
            return;
        }
        self.visited.insert(hex, 0);
        let dist = self.target.distance(&c.id);
        let pos = self
            .results
            .iter()
            .position(|x| self.target.distance(&x.id) > dist)
            .unwrap_or(self.results.len());
        self.results.insert(pos, c);
    }

    fn mark(&mut self, id: &Id, bit: u8) {
        if let Some(v) = self.visited.get_mut(&id.hex()) {
            *v |= bit;
        }
    }

    fn next_unsent(&self, limit: usize) -> Vec<Contact> {
        self.results
            .iter()
            .filter(|c| self.visited.get(&c.id.hex()).copied().unwrap_or(0) & SENT == 0)
            .take(limit)
            .cloned()
            .collect()
    }

    fn closest_distance_hex(&self) -> Option<String> {
        self.results.first().map(|c| self.target.distance(&c.id).hex())
    }

    /// Every contact among the first `CONVERGENCE_WINDOW` sorted results
    /// has at least been queried.
    fn window_fully_queried(&self) -> bool {
        self.results
            .iter()
            .take(CONVERGENCE_WINDOW)
            .all(|c| self.visited.get(&c.id.hex()).copied().unwrap_or(0) & SENT != 0)
    }

    fn fully_round_tripped(&self) -> Vec<Contact> {
        self.results
            .iter()
            .filter(|c| self.visited.get(&c.id.hex()).copied().unwrap_or(0) & (SENT | RECEIVED) == SENT | RECEIVED)
            .cloned()
            .collect()
    }
}

/// Drives an iterative `find_node` lookup toward `target`, seeded from
/// `seed` (either the trie's local-closest set or synthetic bootstrap
/// contacts). On termination, every contact that both received a request
/// and answered it is inserted into the routing trie; the full (possibly
/// larger) result set is returned to the caller.
#[instrument(skip(broker, seed), fields(target = %target.hex()))]
pub async fn find_node<S: PeerStore>(broker: &Broker<S>, target: Id, seed: Vec<Contact>) -> Vec<Contact> {
    let mut queue = SearchQueue::new(target, seed);
    let max_active = broker.config().lookup.max_active_search;
    let round_timeout = broker.config().lookup.round_timeout;
    let mut prev_closest = queue.closest_distance_hex();

    loop {
        let batch = queue.next_unsent(max_active);
        if batch.is_empty() {
            break;
        }

        let mut pending = FuturesUnordered::new();
        for contact in &batch {
            queue.mark(&contact.id, SENT);
            let (txid, rx) = broker.register();
            let query = Envelope::find_node_query(txid.clone(), broker.id().0, target.0);
            let bytes = match mdht_krpc::encode(&query) {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "failed to encode find_node query");
                    broker.expire(&txid);
                    continue;
                }
            };
            if let Err(e) = broker.send(&bytes, contact.addr).await {
                debug!(error = %e, addr = %contact.addr, "failed to send find_node");
                broker.expire(&txid);
                continue;
            }

            let contact_id = contact.id;
            pending.push(async move {
                let reply = tokio::time::timeout(round_timeout, rx).await;
                match reply {
                    Ok(Ok(envelope)) => (contact_id, Some(envelope)),
                    _ => (contact_id, None),
                }
            });
        }

        while let Some((contact_id, envelope)) = pending.next().await {
            match envelope {
                None => {
                    debug!(contact = %contact_id.hex(), "find_node timed out");
                }
                Some(envelope) => {
                    queue.mark(&contact_id, RECEIVED);
                    if let Body::Response { r } = envelope.body {
                        if let Some(nodes) = r.nodes {
                            // `decode_contacts` only ever yields full 26-byte
                            // records, so every contact already carries a
                            // well-formed 20-byte id; the target itself is
                            // filtered out inside `merge`.
                            for contact in decode_contacts(nodes.as_slice()) {
                                queue.merge(contact);
                            }
                        }
                    }
                }
            }
        }

        let closest = queue.closest_distance_hex();
        let improved = match (&prev_closest, &closest) {
            (None, Some(_)) => true,
            (Some(prev), Some(cur)) => cur < prev,
            _ => false,
        };
        prev_closest = closest;

        if !improved && queue.window_fully_queried() {
            break;
        }
    }

    for contact in queue.fully_round_tripped() {
        broker.insert_contact(contact);
    }

    queue.results
}
