use crate::contact::Contact;
use crate::store::PeerStore;
use crate::transport::resolve_bootstrap_hosts;
use crate::Broker;

/// Seeds a lookup when the routing trie has nothing to offer: resolve every
/// well-known bootstrap host and wrap each resolved address in a synthetic
/// contact with a random id. The real id is learned from that router's
/// first reply, which overwrites the placeholder once it round-trips
/// through the search.
pub async fn seed_contacts(hosts: &[String]) -> Vec<Contact> {
    resolve_bootstrap_hosts(hosts)
        .await
        .into_iter()
        .map(Contact::synthetic)
        .collect()
}

/// Returns the trie's own local-closest set, used to seed a lookup when the
/// trie is non-empty.
pub fn seed_from_trie<S: PeerStore>(broker: &Broker<S>, target: &crate::id::Id) -> Vec<Contact> {
    broker.trie().lock().unwrap().find_local_closest(target)
}
