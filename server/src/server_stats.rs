use std::sync::Arc;

use mdht_core::Node;
use tracing::instrument;
use warp::{cors, reply::html, Filter, Reply};

use crate::SharedStore;

/// A thin read-only view over each node's broker state: id, routing-table
/// size, and bucket count. Not part of the DHT wire protocol; the stats
/// page sits beside the Kademlia core rather than inside it.
#[instrument(level = "error", name = "http_dht_stats", skip_all)]
fn stats_handle(nodes: Arc<Vec<Node<SharedStore>>>) -> impl Reply {
    let rows: String = nodes
        .iter()
        .map(|n| {
            let stats = n.stats();
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                stats.id.hex(),
                stats.num_contacts,
                stats.num_buckets,
            )
        })
        .collect();

    let body = format!(
        r#"
    <html>
    <head><title>mdht</title></head>
    <body>
      <h1>mdht</h1>
      <p>{count} node(s) running</p>
      <table border="1" cellpadding="4">
        <tr><th>Id</th><th>Contacts</th><th>Buckets</th></tr>
        {rows}
      </table>
    </body>
    </html>
    "#,
        count = nodes.len(),
    );

    html(body)
}

pub fn stats_route(
    nodes: Arc<Vec<Node<SharedStore>>>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .and(warp::any().map(move || nodes.clone()))
        .map(stats_handle)
        .with(cors().allow_any_origin().allow_method("GET").build())
}
