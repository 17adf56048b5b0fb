//! The Kademlia-style DHT core for the Mainline overlay: 160-bit identifier
//! arithmetic and routing trie, the message broker that multiplexes inbound
//! datagrams and outbound requests, and the iterative `find_node` lookup
//! engine that drives bootstrap and refresh. The KRPC wire codec itself
//! lives in `mdht-krpc`; transport and storage are injected, not owned.

mod bootstrap;
mod broker;
pub mod config;
pub mod contact;
mod error;
pub mod id;
mod node;
pub mod routing;
mod search;
pub mod store;
pub mod token;
pub mod transport;
mod updater;

pub use bootstrap::{seed_contacts, seed_from_trie};
pub use broker::Broker;
pub use config::SystemConfig;
pub use contact::Contact;
pub use error::TransportError;
pub use id::Id;
pub use node::{Node, NodeStats};
pub use routing::RoutingTrie;
pub use store::{PeerStore, StoreError};
pub use token::TokenAuthority;
