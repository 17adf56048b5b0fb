use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mdht_core::{Id, Node, PeerStore, SystemConfig};
use mdht_store::{InMemoryStore, SledStore};
use tracing::{error, info, warn};

mod server_stats;

/// The concrete store every node in this process shares, selected once at
/// startup.
pub type SharedStore = Arc<dyn PeerStore>;

#[derive(Parser, Debug)]
#[clap(name = "mdht-server", about = "A Mainline DHT participant")]
struct Args {
    /// Number of DHT nodes to run in this process.
    #[clap(long, default_value = "1")]
    node_count: usize,

    /// Address the stats HTTP endpoint listens on.
    #[clap(long, default_value = "127.0.0.1:3030")]
    http_bind: SocketAddr,

    /// Directory for the durable sled store. Without it, peers and routing
    /// tables live only in memory for the life of the process.
    #[clap(long)]
    data_dir: Option<PathBuf>,

    /// Overrides the default bootstrap router hosts.
    #[clap(long)]
    bootstrap: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let store: SharedStore = match &args.data_dir {
        Some(path) => Arc::new(SledStore::open(path)?),
        None => Arc::new(InMemoryStore::new()),
    };

    let mut config = SystemConfig::default();
    if !args.bootstrap.is_empty() {
        config.bootstrap.hosts = args.bootstrap.clone();
    }

    let mut nodes = Vec::with_capacity(args.node_count);

    let resumable = store.load_all_node_ids().await.unwrap_or_default();
    info!(found = resumable.len(), "resuming persisted node ids");
    for id_hex in resumable.into_iter().take(args.node_count) {
        let id = match Id::from_hex(&id_hex) {
            Some(id) => id,
            None => {
                warn!(id_hex, "skipping malformed persisted node id");
                continue;
            }
        };
        match Node::bind(id, config.clone(), store.clone()).await {
            Ok(node) => nodes.push(node),
            Err(e) => warn!(error = %e, id = %id.hex(), "failed to resume node, will skip"),
        }
    }

    while nodes.len() < args.node_count {
        let id = Id::random();
        match Node::bind(id, config.clone(), store.clone()).await {
            Ok(node) => nodes.push(node),
            Err(e) => {
                error!(error = %e, "failed to bind node socket, aborting startup");
                return Err(e.into());
            }
        }
    }
    info!(count = nodes.len(), "nodes running");

    let nodes = Arc::new(nodes);
    let routes = server_stats::stats_route(nodes.clone());
    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(args.http_bind, async {
        let _ = tokio::signal::ctrl_c().await;
    });

    server.await;

    info!("shutting down, persisting routing snapshots");
    for node in nodes.iter() {
        let blob = node.broker().trie().lock().unwrap().encode_snapshot();
        if let Err(e) = store.save_routing_snapshot(node.id(), blob).await {
            warn!(error = %e, id = %node.id().hex(), "failed to persist routing snapshot");
        }
        node.shutdown();
    }

    Ok(())
}
