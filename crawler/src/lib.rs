//! Crawler for Kademlia-style discovery networks.
//!
//! The [`Crawler`] walks the network through a [`NodeTransport`] and records
//! what it finds in a [`NodeStore`]. [`keygen`] finds public keys at chosen
//! log-distances, for querying individual buckets of a remote node.

mod builder;
mod candidate;
mod crawler;
pub mod keygen;
mod pool;
mod session;
mod status;
mod store;

#[cfg(test)]
mod test_utils;

pub use builder::{CrawlerBuilder, CrawlerBuilderError, CrawlerConfig};
pub use candidate::{transition, Attempt, Candidate, Outcome, Phase};
pub use crawler::{Crawler, CrawlerError};
pub use keygen::KeyGenResult;
pub use pool::PhaseCounts;
pub use status::{ClientsReport, StatusReport};
pub use store::{MemoryStore, NodeStore, StoreError};

// Re-exports.
pub use node_observer_discovery::{
    log_distance, secp256k1, Chain, HandshakeInfo, Node, NodeId, NodeIdentity, NodeParseError,
    NodeTransport, TransportError,
};
pub use tokio_util::sync::CancellationToken;
