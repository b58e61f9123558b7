//! Chain selection for crawling.

use std::error::Error;
use std::fmt;
use std::str::FromStr;

/// The network whose nodes are crawled.
///
/// Handshakes with nodes of another chain are reported as
/// [`TransportError::IncompatibleChain`](crate::TransportError::IncompatibleChain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    Mainnet,
    Sepolia,
    Holesky,
    /// Any other network, identified by its chain ID.
    Other(u64),
}

impl Chain {
    /// EIP-155 chain ID.
    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Mainnet => 1,
            Chain::Sepolia => 11_155_111,
            Chain::Holesky => 17_000,
            Chain::Other(id) => *id,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::Mainnet => write!(f, "mainnet"),
            Chain::Sepolia => write!(f, "sepolia"),
            Chain::Holesky => write!(f, "holesky"),
            Chain::Other(id) => write!(f, "chain-{id}"),
        }
    }
}

/// The chain name is neither known nor a numeric chain ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChain(pub String);

impl fmt::Display for UnknownChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown chain: {}", self.0)
    }
}

impl Error for UnknownChain {}

impl FromStr for Chain {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Chain::Mainnet),
            "sepolia" => Ok(Chain::Sepolia),
            "holesky" => Ok(Chain::Holesky),
            other => match other.parse::<u64>() {
                Ok(1) => Ok(Chain::Mainnet),
                Ok(11_155_111) => Ok(Chain::Sepolia),
                Ok(17_000) => Ok(Chain::Holesky),
                Ok(id) => Ok(Chain::Other(id)),
                Err(_) => Err(UnknownChain(s.to_string())),
            },
        }
    }
}
