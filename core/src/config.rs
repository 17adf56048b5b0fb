use std::time::Duration;

/// Tunables for the routing trie and the iterative lookup engine. The
/// defaults are the overlay's standard constants, not arbitrary choices, so
/// callers only override them in tests or for deliberately non-standard
/// deployments.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RoutingConfig {
    /// Max contacts per bucket, `K` in the original paper.
    pub bucket_size: usize,
    /// Buckets never split past this count (bounds the trie to the id width).
    pub max_buckets: usize,
    /// Results returned by a local `find_local_closest` search.
    pub max_search_results: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            bucket_size: 8,
            max_buckets: 160,
            max_search_results: 8,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LookupConfig {
    /// `alpha`: outstanding `find_node` requests per lookup round.
    pub max_active_search: usize,
    /// Per-round response timeout.
    pub round_timeout: Duration,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            max_active_search: 8,
            round_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct UpdaterConfig {
    pub refresh_interval: Duration,
    pub secret_rotation_interval: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            secret_rotation_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Well-known routers contacted when the routing trie is empty.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BootstrapConfig {
    pub hosts: Vec<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            hosts: vec![
                "router.bittorrent.com:6881".to_string(),
                "dht.transmissionbt.com:6881".to_string(),
                "router.utorrent.com:6881".to_string(),
            ],
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct SystemConfig {
    pub routing: RoutingConfig,
    pub lookup: LookupConfig,
    pub updater: UpdaterConfig,
    pub bootstrap: BootstrapConfig,
}
