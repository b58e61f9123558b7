mod chain;
mod node;
mod transport;

pub use chain::{Chain, UnknownChain};
pub use node::{
    log_distance, Node, NodeId, NodeIdentity, NodeParseError, NODE_ID_BITS, NODE_ID_LEN,
    PUBLIC_KEY_LEN,
};
pub use transport::{HandshakeInfo, NodeTransport, TransportError};

// Re-exported so downstream crates agree on the key types.
pub use bitcoin::secp256k1;
