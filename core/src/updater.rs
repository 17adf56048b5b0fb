use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::bootstrap::seed_contacts;
use crate::id::Id;
use crate::search;
use crate::store::PeerStore;
use crate::Broker;

/// The periodic background task a node runs for its whole lifetime:
/// bootstraps once if the trie is empty, refreshes with a random lookup
/// every `refresh_interval`, and, every `secret_rotation_interval`, rotates
/// the token secret and sweeps peer rows older than a day from the store
/// (the same timer the source drives both from). Missed ticks are
/// best-effort, never queued.
#[instrument(skip(broker), fields(id = %broker.id().hex()))]
pub async fn run<S: PeerStore>(broker: Arc<Broker<S>>) {
    if broker.trie().lock().unwrap().is_empty() {
        info!("routing trie empty, bootstrapping");
        let seed = seed_contacts(&broker.config().bootstrap.hosts).await;
        let own_id = broker.id();
        search::find_node(&broker, own_id, seed).await;
    }

    let refresh_interval = broker.config().updater.refresh_interval;
    let rotation_interval = broker.config().updater.secret_rotation_interval;
    let mut refresh_tick = tokio::time::interval(refresh_interval);
    let mut rotation_tick = tokio::time::interval(rotation_interval);
    // The first tick of `interval` fires immediately; we already handled
    // the startup bootstrap above, so skip it here.
    refresh_tick.tick().await;
    rotation_tick.tick().await;

    loop {
        tokio::select! {
            _ = refresh_tick.tick() => {
                let target = Id::random();
                info!(target = %target.hex(), "periodic refresh lookup");
                let seed = {
                    let trie = broker.trie().lock().unwrap();
                    trie.find_local_closest(&target)
                };
                search::find_node(&broker, target, seed).await;
            }
            _ = rotation_tick.tick() => {
                info!("rotating token secret");
                broker.rotate_secret();
                if let Err(e) = broker.store().evict_old_peers().await {
                    warn!(error = %e, "failed to evict expired peer entries");
                }
            }
        }
    }
}
