//! Builder pattern for configuring and creating crawler instances.

use crate::crawler::Crawler;
use crate::store::NodeStore;
use node_observer_discovery::secp256k1::{rand, Secp256k1, SecretKey};
use node_observer_discovery::{Chain, Node, NodeIdentity, NodeParseError, NodeTransport};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default wait before a node is pinged again.
const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(2 * 24 * 60 * 60);
/// Default wait before a handshaked node is handshaked again. Client IDs rarely change.
const DEFAULT_HANDSHAKE_REFRESH_TIMEOUT: Duration = Duration::from_secs(20 * 24 * 60 * 60);
/// Default consecutive ping failures before a node is abandoned.
const DEFAULT_MAX_PING_TRIES: u32 = 3;
/// Default consecutive handshake failures before a node is abandoned.
const DEFAULT_MAX_HANDSHAKE_TRIES: u32 = 3;
/// Default time budget for generating bucket keys.
const DEFAULT_KEYGEN_TIMEOUT: Duration = Duration::from_secs(2);
/// Default number of key generation workers.
const DEFAULT_KEYGEN_CONCURRENCY: usize = 2;
/// Default period of status summaries.
const DEFAULT_STATUS_LOG_PERIOD: Duration = Duration::from_secs(10);
/// Default timeout for a single ping or handshake.
const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(20);
/// Default wait between scans for due candidates while idle.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Parallel interrogations per available CPU.
const CONCURRENCY_PER_CPU: usize = 10;

/// Errors that can occur during crawler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlerBuilderError {
    /// The local private key is not a valid secp256k1 secret key.
    InvalidPrivateKey,
    /// A bootnode URL could not be parsed.
    InvalidBootnode { url: String, err: NodeParseError },
    /// A limit that must be at least one was set to zero.
    ZeroLimit(&'static str),
    /// A timer period was set to zero.
    ZeroPeriod(&'static str),
}

impl fmt::Display for CrawlerBuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerBuilderError::InvalidPrivateKey => write!(f, "Invalid node private key"),
            CrawlerBuilderError::InvalidBootnode { url, err } => {
                write!(f, "Invalid bootnode {url}: {err}")
            }
            CrawlerBuilderError::ZeroLimit(name) => write!(f, "{name} must be at least 1"),
            CrawlerBuilderError::ZeroPeriod(name) => write!(f, "{name} must be non-zero"),
        }
    }
}

impl std::error::Error for CrawlerBuilderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CrawlerBuilderError::InvalidBootnode { err, .. } => Some(err),
            CrawlerBuilderError::InvalidPrivateKey => None,
            CrawlerBuilderError::ZeroLimit(_) => None,
            CrawlerBuilderError::ZeroPeriod(_) => None,
        }
    }
}

/// Immutable crawl settings, shared by every worker.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Network the crawler operates on.
    pub chain: Chain,
    /// Well-known nodes to start from.
    pub bootnodes: Vec<Node>,
    /// Key of the local node, used by the transport to sign packets.
    pub private_key: SecretKey,
    /// Maximum number of in-flight pings and handshakes.
    pub concurrency_limit: usize,
    /// Wait after the last ping before a node is pinged again.
    pub refresh_timeout: Duration,
    /// Consecutive ping failures before a node is abandoned.
    pub max_ping_tries: u32,
    /// Wait after the last successful handshake before a node is handshaked again.
    pub handshake_refresh_timeout: Duration,
    /// Consecutive handshake failures before a node is abandoned.
    pub max_handshake_tries: u32,
    /// Time budget of a single bucket key generation.
    pub keygen_timeout: Duration,
    /// Number of key generation workers.
    pub keygen_concurrency: usize,
    /// Period of status summaries.
    pub status_log_period: Duration,
    /// Timeout for a single ping or handshake.
    pub peer_timeout: Duration,
    /// Wait between scans for due candidates while idle.
    pub poll_interval: Duration,
}

impl CrawlerConfig {
    /// Identity derived from the local private key.
    pub fn local_identity(&self) -> NodeIdentity {
        let secp = Secp256k1::signing_only();
        NodeIdentity::new(self.private_key.public_key(&secp))
    }
}

/// Builder for creating a customized [`Crawler`] instance.
///
/// # Example
///
/// ```
/// # fn main() -> Result<(), node_observer_crawler::CrawlerBuilderError> {
/// use node_observer_crawler::{Chain, CrawlerBuilder};
/// use std::time::Duration;
///
/// let config = CrawlerBuilder::new(Chain::Mainnet)
///     .with_concurrency_limit(64)
///     .with_refresh_timeout(Duration::from_secs(60 * 60))
///     .with_private_key_hex("b71c71a67e1177ad4e901695e1b4b9ee17ae16c6668d313eac2f96dbcda3f291")?
///     .build_config()?;
/// assert_eq!(config.concurrency_limit, 64);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CrawlerBuilder {
    chain: Chain,
    bootnodes: Vec<Node>,
    private_key: Option<SecretKey>,
    concurrency_limit: usize,
    refresh_timeout: Duration,
    max_ping_tries: u32,
    handshake_refresh_timeout: Duration,
    max_handshake_tries: u32,
    keygen_timeout: Duration,
    keygen_concurrency: usize,
    status_log_period: Duration,
    peer_timeout: Duration,
    poll_interval: Duration,
}

impl CrawlerBuilder {
    /// Create a new crawler builder for the specified chain.
    ///
    /// # Arguments
    ///
    /// * `chain` - The network to crawl.
    ///
    /// # Returns
    ///
    /// A new `CrawlerBuilder` instance.
    pub fn new(chain: Chain) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        CrawlerBuilder {
            chain,
            bootnodes: Vec::new(),
            private_key: None,
            concurrency_limit: cpus * CONCURRENCY_PER_CPU,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            max_ping_tries: DEFAULT_MAX_PING_TRIES,
            handshake_refresh_timeout: DEFAULT_HANDSHAKE_REFRESH_TIMEOUT,
            max_handshake_tries: DEFAULT_MAX_HANDSHAKE_TRIES,
            keygen_timeout: DEFAULT_KEYGEN_TIMEOUT,
            keygen_concurrency: DEFAULT_KEYGEN_CONCURRENCY,
            status_log_period: DEFAULT_STATUS_LOG_PERIOD,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Add a bootnode.
    pub fn with_bootnode(mut self, node: Node) -> Self {
        self.bootnodes.push(node);
        self
    }

    /// Add bootnodes from `enode://` URLs.
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - The builder for method chaining if every URL parses.
    /// * `Err(CrawlerBuilderError)` - The first URL that failed to parse.
    pub fn with_bootnode_urls<I, S>(mut self, urls: I) -> Result<Self, CrawlerBuilderError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for url in urls {
            let url = url.as_ref();
            let node = Node::from_str(url).map_err(|err| CrawlerBuilderError::InvalidBootnode {
                url: url.to_string(),
                err,
            })?;
            self.bootnodes.push(node);
        }
        Ok(self)
    }

    /// Set the local node key. A random key is generated if none is set.
    pub fn with_private_key(mut self, key: SecretKey) -> Self {
        self.private_key = Some(key);
        self
    }

    /// Set the local node key from 32 bytes of hex.
    pub fn with_private_key_hex(self, key: &str) -> Result<Self, CrawlerBuilderError> {
        let key = SecretKey::from_str(key.trim().trim_start_matches("0x"))
            .map_err(|_| CrawlerBuilderError::InvalidPrivateKey)?;
        Ok(self.with_private_key(key))
    }

    /// Set the maximum number of in-flight pings and handshakes.
    ///
    /// Defaults to ten per available CPU.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Set how long after its last ping a node becomes due again (defaults to 48 hours).
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Set the consecutive ping failures before a node is abandoned (defaults to 3).
    pub fn with_max_ping_tries(mut self, tries: u32) -> Self {
        self.max_ping_tries = tries;
        self
    }

    /// Set how long after a successful handshake a node is handshaked again (defaults to 20 days).
    pub fn with_handshake_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_refresh_timeout = timeout;
        self
    }

    /// Set the consecutive handshake failures before a node is abandoned (defaults to 3).
    pub fn with_max_handshake_tries(mut self, tries: u32) -> Self {
        self.max_handshake_tries = tries;
        self
    }

    /// Set the time budget for bucket key generation (defaults to 2 seconds).
    pub fn with_keygen_timeout(mut self, timeout: Duration) -> Self {
        self.keygen_timeout = timeout;
        self
    }

    /// Set the number of key generation workers (defaults to 2).
    pub fn with_keygen_concurrency(mut self, workers: usize) -> Self {
        self.keygen_concurrency = workers;
        self
    }

    /// Set the period of status summaries (defaults to 10 seconds).
    pub fn with_status_log_period(mut self, period: Duration) -> Self {
        self.status_log_period = period;
        self
    }

    /// Set the timeout for a single ping or handshake.
    ///
    /// A timed out attempt counts as a failure towards the try ceilings.
    /// Defaults to 20 seconds.
    pub fn with_peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }

    /// Set how often an idle crawler rescans for due candidates (defaults to 1 second).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Validate the settings into a [`CrawlerConfig`].
    pub fn build_config(self) -> Result<CrawlerConfig, CrawlerBuilderError> {
        if self.concurrency_limit == 0 {
            return Err(CrawlerBuilderError::ZeroLimit("Concurrency limit"));
        }
        if self.max_ping_tries == 0 {
            return Err(CrawlerBuilderError::ZeroLimit("Max ping tries"));
        }
        if self.max_handshake_tries == 0 {
            return Err(CrawlerBuilderError::ZeroLimit("Max handshake tries"));
        }
        if self.keygen_concurrency == 0 {
            return Err(CrawlerBuilderError::ZeroLimit("Keygen concurrency"));
        }
        if self.status_log_period.is_zero() {
            return Err(CrawlerBuilderError::ZeroPeriod("Status log period"));
        }
        if self.poll_interval.is_zero() {
            return Err(CrawlerBuilderError::ZeroPeriod("Poll interval"));
        }

        let private_key = self
            .private_key
            .unwrap_or_else(|| SecretKey::new(&mut rand::thread_rng()));

        Ok(CrawlerConfig {
            chain: self.chain,
            bootnodes: self.bootnodes,
            private_key,
            concurrency_limit: self.concurrency_limit,
            refresh_timeout: self.refresh_timeout,
            max_ping_tries: self.max_ping_tries,
            handshake_refresh_timeout: self.handshake_refresh_timeout,
            max_handshake_tries: self.max_handshake_tries,
            keygen_timeout: self.keygen_timeout,
            keygen_concurrency: self.keygen_concurrency,
            status_log_period: self.status_log_period,
            peer_timeout: self.peer_timeout,
            poll_interval: self.poll_interval,
        })
    }

    /// Build the crawler with the configured options.
    ///
    /// # Arguments
    ///
    /// * `transport` - Ping and handshake primitives.
    /// * `store` - Where crawl results are persisted.
    pub fn build<T: NodeTransport, S: NodeStore>(
        self,
        transport: T,
        store: S,
    ) -> Result<Crawler<T, S>, CrawlerBuilderError> {
        Ok(Crawler::new(self.build_config()?, transport, store))
    }
}
