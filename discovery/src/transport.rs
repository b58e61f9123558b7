//! Discovery transport contract.
//!
//! The crawler never touches packets or sockets itself. It interrogates nodes
//! only through the [`NodeTransport`] trait, which keeps the wire protocol
//! pluggable and lets the scheduling logic run against scripted transports
//! in tests.

use crate::node::Node;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::io;

/// Errors a transport can report for a single ping or handshake.
#[derive(Debug)]
pub enum TransportError {
    /// An I/O error occurred on the underlying socket.
    Io(io::Error),
    /// The remote node did not answer in time.
    Timeout,
    /// The remote node answered with something the protocol does not allow.
    ProtocolFailed(String),
    /// The remote node is healthy but serves another chain.
    IncompatibleChain,
    /// The operation was abandoned because the crawl is shutting down.
    Cancelled,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Io(err) => write!(f, "Transport I/O error: {err}"),
            TransportError::Timeout => write!(f, "Node did not respond in time"),
            TransportError::ProtocolFailed(reason) => {
                write!(f, "Protocol handling failed: {reason}")
            }
            TransportError::IncompatibleChain => write!(f, "Node serves a different chain"),
            TransportError::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TransportError::Io(err) => Some(err),
            TransportError::Timeout => None,
            TransportError::ProtocolFailed(_) => None,
            TransportError::IncompatibleChain => None,
            TransportError::Cancelled => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Io(err)
    }
}

/// What a successful handshake learned about a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeInfo {
    /// Client software name advertised by the node, if it sent one.
    pub client_id: Option<String>,
    /// Other nodes the remote node knows about.
    pub neighbors: Vec<Node>,
}

impl HandshakeInfo {
    pub fn new(client_id: Option<String>, neighbors: Vec<Node>) -> Self {
        HandshakeInfo {
            client_id,
            neighbors,
        }
    }
}

/// Ping and handshake primitives against a remote node.
///
/// Implementations are shared by every crawler worker, so they must be cheap
/// to clone (usually an `Arc` around a socket). Each call should bound its own
/// network wait. The crawler additionally wraps every call in its own peer
/// timeout and drops the future when the crawl is cancelled.
pub trait NodeTransport: Clone + Send + Sync + 'static {
    /// Check whether the node answers on its discovery endpoint.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The node answered.
    /// * `Ok(false)` - The request went out but no answer arrived.
    /// * `Err(TransportError)` - The request could not be completed.
    fn ping(&self, node: &Node) -> impl Future<Output = Result<bool, TransportError>> + Send;

    /// Run the discovery handshake with a node that just answered a ping.
    fn handshake(
        &self,
        node: &Node,
    ) -> impl Future<Output = Result<HandshakeInfo, TransportError>> + Send;
}
