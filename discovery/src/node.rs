//! Node identity structures and the Kademlia log-distance metric.

use bitcoin::secp256k1::{self, PublicKey};
use sha3::{Digest, Keccak256};
use std::error::Error;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Length in bytes of a node ID.
pub const NODE_ID_LEN: usize = 32;
/// Number of bits in the ID space, also the largest possible log-distance.
pub const NODE_ID_BITS: u32 = (NODE_ID_LEN * 8) as u32;
/// Length in bytes of a public key in its uncompressed form, without the `0x04` prefix.
pub const PUBLIC_KEY_LEN: usize = 64;

const ENODE_SCHEME: &str = "enode://";
const DISCPORT_PARAM: &str = "discport=";

/// Errors that can occur while parsing node identities and records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeParseError {
    /// The input is not valid hex.
    InvalidHex,
    /// The decoded bytes have the wrong length.
    InvalidLength { expected: usize, actual: usize },
    /// The bytes do not encode a point on the secp256k1 curve.
    InvalidPublicKey(secp256k1::Error),
    /// The URL does not start with `enode://` or is missing the `@` separator.
    InvalidEnode,
    /// The host part is not an `ip:port` socket address.
    InvalidAddress(String),
}

impl fmt::Display for NodeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeParseError::InvalidHex => write!(f, "Input is not valid hex"),
            NodeParseError::InvalidLength { expected, actual } => {
                write!(f, "Expected {expected} bytes, got {actual}")
            }
            NodeParseError::InvalidPublicKey(_) => write!(f, "Invalid secp256k1 public key"),
            NodeParseError::InvalidEnode => {
                write!(f, "Node URL must follow format 'enode://<pubkey>@<ip>:<port>'")
            }
            NodeParseError::InvalidAddress(addr) => write!(f, "Invalid node address: {addr}"),
        }
    }
}

impl Error for NodeParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NodeParseError::InvalidPublicKey(err) => Some(err),
            NodeParseError::InvalidHex
            | NodeParseError::InvalidLength { .. }
            | NodeParseError::InvalidEnode
            | NodeParseError::InvalidAddress(_) => None,
        }
    }
}

impl From<hex::FromHexError> for NodeParseError {
    fn from(_: hex::FromHexError) -> Self {
        NodeParseError::InvalidHex
    }
}

impl From<secp256k1::Error> for NodeParseError {
    fn from(err: secp256k1::Error) -> Self {
        NodeParseError::InvalidPublicKey(err)
    }
}

/// A fixed-width identifier in the XOR metric space.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// Wrap raw ID bytes.
    pub const fn new(bytes: [u8; NODE_ID_LEN]) -> Self {
        NodeId(bytes)
    }

    /// Derive the node ID of a public key: Keccak-256 over the 64-byte uncompressed key.
    pub fn from_public_key(key: &PublicKey) -> Self {
        let uncompressed = key.serialize_uncompressed();
        let digest = Keccak256::digest(&uncompressed[1..]);
        let mut bytes = [0u8; NODE_ID_LEN];
        bytes.copy_from_slice(&digest);
        NodeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// Log-distance to another ID, see [`log_distance`].
    pub fn log_distance(&self, other: &NodeId) -> u32 {
        log_distance(self, other)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Abbreviated, full IDs drown out everything else in debug logs.
        write!(f, "NodeId({}..)", &hex::encode(self.0)[..8])
    }
}

impl FromStr for NodeId {
    type Err = NodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s.trim_start_matches("0x"))?;
        if raw.len() != NODE_ID_LEN {
            return Err(NodeParseError::InvalidLength {
                expected: NODE_ID_LEN,
                actual: raw.len(),
            });
        }
        let mut bytes = [0u8; NODE_ID_LEN];
        bytes.copy_from_slice(&raw);
        Ok(NodeId(bytes))
    }
}

/// Logarithmic XOR distance between two IDs.
///
/// This is the bit length of `a XOR b`, so two IDs differing in the most
/// significant bit are at distance 256 and identical IDs are at distance 0.
/// All IDs at distance `d` from a node fall into that node's bucket `d`.
pub fn log_distance(a: &NodeId, b: &NodeId) -> u32 {
    let mut leading_zeros = 0u32;
    for (x, y) in a.0.iter().zip(b.0.iter()) {
        let diff = x ^ y;
        if diff == 0 {
            leading_zeros += 8;
        } else {
            leading_zeros += diff.leading_zeros();
            break;
        }
    }
    NODE_ID_BITS - leading_zeros
}

/// A public key together with its derived [`NodeId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    public_key: PublicKey,
    id: NodeId,
}

impl NodeIdentity {
    pub fn new(public_key: PublicKey) -> Self {
        NodeIdentity {
            id: NodeId::from_public_key(&public_key),
            public_key,
        }
    }

    /// Parse a public key from 64 bytes of uncompressed hex (the enode form).
    ///
    /// The 65-byte form with a `04` prefix and the 33-byte compressed form are accepted too.
    pub fn from_hex(s: &str) -> Result<Self, NodeParseError> {
        let raw = hex::decode(s.trim_start_matches("0x"))?;
        let public_key = match raw.len() {
            PUBLIC_KEY_LEN => {
                let mut prefixed = [0u8; PUBLIC_KEY_LEN + 1];
                prefixed[0] = 0x04;
                prefixed[1..].copy_from_slice(&raw);
                PublicKey::from_slice(&prefixed)?
            }
            33 | 65 => PublicKey::from_slice(&raw)?,
            actual => {
                return Err(NodeParseError::InvalidLength {
                    expected: PUBLIC_KEY_LEN,
                    actual,
                })
            }
        };
        Ok(NodeIdentity::new(public_key))
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The 64-byte uncompressed public key, as used in enode URLs.
    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.public_key.serialize_uncompressed()[1..])
    }

    /// Log-distance between the derived IDs of two identities.
    pub fn log_distance(&self, other: &NodeIdentity) -> u32 {
        log_distance(&self.id, &other.id)
    }
}

impl From<PublicKey> for NodeIdentity {
    fn from(public_key: PublicKey) -> Self {
        NodeIdentity::new(public_key)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}...", &self.id.to_string()[..8])
    }
}

/// A node on the discovery network: who it is and where its discovery endpoint listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub identity: NodeIdentity,
    /// UDP endpoint of the discovery protocol.
    pub endpoint: SocketAddr,
}

impl Node {
    pub fn new(identity: NodeIdentity, endpoint: SocketAddr) -> Self {
        Node { identity, endpoint }
    }

    pub fn id(&self) -> NodeId {
        self.identity.id()
    }

    /// Render the node as an `enode://` URL.
    pub fn to_enode(&self) -> String {
        format!(
            "{ENODE_SCHEME}{}@{}",
            self.identity.public_key_hex(),
            self.endpoint
        )
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identity, self.endpoint)
    }
}

impl FromStr for Node {
    type Err = NodeParseError;

    /// Parse an `enode://<pubkey>@<ip>:<port>` URL.
    ///
    /// A `?discport=N` query overrides the port used for discovery.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .trim()
            .strip_prefix(ENODE_SCHEME)
            .ok_or(NodeParseError::InvalidEnode)?;
        let (key, host) = rest.split_once('@').ok_or(NodeParseError::InvalidEnode)?;
        let identity = NodeIdentity::from_hex(key)?;

        let (address, query) = match host.split_once('?') {
            Some((address, query)) => (address, Some(query)),
            None => (host, None),
        };
        let mut endpoint: SocketAddr = address
            .parse()
            .map_err(|_| NodeParseError::InvalidAddress(address.to_string()))?;

        if let Some(query) = query {
            for param in query.split('&') {
                if let Some(port) = param.strip_prefix(DISCPORT_PARAM) {
                    let port = port
                        .parse::<u16>()
                        .map_err(|_| NodeParseError::InvalidAddress(host.to_string()))?;
                    endpoint.set_port(port);
                }
            }
        }

        Ok(Node { identity, endpoint })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    fn identity(seed: u8) -> NodeIdentity {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[seed; 32]).unwrap();
        NodeIdentity::new(PublicKey::from_secret_key(&secp, &secret))
    }

    #[test]
    fn test_log_distance_identical() {
        let a = NodeId::new([7; 32]);
        assert_eq!(log_distance(&a, &a), 0);
    }

    #[test]
    fn test_log_distance_bits() {
        let a = NodeId::new([0; 32]);

        let mut top = [0u8; 32];
        top[0] = 0x80;
        assert_eq!(log_distance(&a, &NodeId::new(top)), 256);

        let mut low = [0u8; 32];
        low[31] = 0x01;
        assert_eq!(log_distance(&a, &NodeId::new(low)), 1);

        let mut middle = [0u8; 32];
        middle[1] = 0x10;
        assert_eq!(log_distance(&a, &NodeId::new(middle)), 256 - 8 - 3);
    }

    #[test]
    fn test_log_distance_symmetric() {
        let a = identity(1);
        let b = identity(2);
        assert_eq!(a.log_distance(&b), b.log_distance(&a));
    }

    #[test]
    fn test_node_id_derivation() {
        let id = identity(1).id();
        let expected = NodeId::from_public_key(identity(1).public_key());
        assert_eq!(id, expected);
        assert_ne!(id, identity(2).id());
    }

    #[test]
    fn test_identity_hex_forms() {
        let original = identity(3);
        let uncompressed = original.public_key_hex();
        assert_eq!(uncompressed.len(), 128);
        assert_eq!(NodeIdentity::from_hex(&uncompressed).unwrap(), original);

        let compressed = hex::encode(original.public_key().serialize());
        assert_eq!(NodeIdentity::from_hex(&compressed).unwrap(), original);
    }

    #[test]
    fn test_identity_invalid() {
        assert_eq!(
            NodeIdentity::from_hex("zz"),
            Err(NodeParseError::InvalidHex)
        );
        assert_eq!(
            NodeIdentity::from_hex("0102"),
            Err(NodeParseError::InvalidLength {
                expected: 64,
                actual: 2
            })
        );
        let err = NodeIdentity::from_hex(&"00".repeat(64)).unwrap_err();
        assert!(matches!(err, NodeParseError::InvalidPublicKey(_)));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_enode_roundtrip() {
        let node = Node::new(identity(4), "10.0.0.1:30303".parse().unwrap());
        let parsed: Node = node.to_enode().parse().unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn test_enode_discport() {
        let url = format!(
            "enode://{}@[::1]:30303?discport=30301",
            identity(5).public_key_hex()
        );
        let node: Node = url.parse().unwrap();
        assert_eq!(node.endpoint, "[::1]:30301".parse().unwrap());
    }

    #[test]
    fn test_enode_invalid() {
        let key = identity(6).public_key_hex();
        assert_eq!(
            "http://foo".parse::<Node>(),
            Err(NodeParseError::InvalidEnode)
        );
        assert_eq!(
            format!("enode://{key}").parse::<Node>(),
            Err(NodeParseError::InvalidEnode)
        );
        assert_eq!(
            format!("enode://{key}@localhost:30303").parse::<Node>(),
            Err(NodeParseError::InvalidAddress("localhost:30303".to_string()))
        );
    }

    #[test]
    fn test_node_id_from_str() {
        let id = identity(7).id();
        assert_eq!(id.to_string().parse::<NodeId>().unwrap(), id);
        assert_eq!(
            "abcd".parse::<NodeId>(),
            Err(NodeParseError::InvalidLength {
                expected: 32,
                actual: 2
            })
        );
    }
}
