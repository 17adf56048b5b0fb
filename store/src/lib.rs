//! Implementations of `mdht_core::PeerStore`: an in-memory store for
//! tests and light deployments, and a `sled`-backed durable store for
//! production.

mod memory;
mod sled_store;

pub use memory::InMemoryStore;
pub use sled_store::SledStore;
