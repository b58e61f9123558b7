use crate::builder::CrawlerConfig;
use crate::keygen;
use crate::pool::CandidatePool;
use crate::session::CrawlSession;
use crate::store::{NodeStore, StoreError};
use log::info;
use node_observer_discovery::secp256k1::PublicKey;
use node_observer_discovery::{NodeIdentity, NodeTransport};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

/// Errors that stop a crawl before it starts.
#[derive(Debug)]
pub enum CrawlerError {
    /// The store could not provide the seed candidates.
    StoreUnavailable(StoreError),
}

impl fmt::Display for CrawlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerError::StoreUnavailable(err) => {
                write!(f, "Cannot load seed candidates: {err}")
            }
        }
    }
}

impl std::error::Error for CrawlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CrawlerError::StoreUnavailable(err) => Some(err),
        }
    }
}

/// A crawler for a Kademlia discovery network.
///
/// The crawler pings known nodes, handshakes the ones that answer, follows
/// the neighbors they report, and persists what it learns through a
/// [`NodeStore`]. Build one with [`CrawlerBuilder`](crate::CrawlerBuilder).
#[derive(Debug, Clone)]
pub struct Crawler<T, S> {
    config: Arc<CrawlerConfig>,
    transport: T,
    store: S,
}

impl<T: NodeTransport, S: NodeStore> Crawler<T, S> {
    pub(crate) fn new(config: CrawlerConfig, transport: T, store: S) -> Self {
        Crawler {
            config: Arc::new(config),
            transport,
            store,
        }
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Identity of the local node, derived from the configured private key.
    pub fn local_identity(&self) -> NodeIdentity {
        self.config.local_identity()
    }

    /// Crawl the network until `shutdown` is cancelled.
    ///
    /// The candidate pool starts from the store's seed candidates plus the
    /// configured bootnodes and grows with every neighbor a handshake reports.
    ///
    /// # Termination
    ///
    /// Cancelling `shutdown` stops new work, aborts pending transport calls
    /// and waits for every task to exit. Every completed transition has been
    /// handed to the store by the time this returns.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The crawl was cancelled.
    /// * `Err(CrawlerError)` - The store was unreachable at startup.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), CrawlerError> {
        let seeds = self
            .store
            .list_seed_candidates()
            .await
            .map_err(CrawlerError::StoreUnavailable)?;

        let local = self.config.local_identity();
        let pool = CandidatePool::new(local.id());

        let mut restored = 0;
        for candidate in seeds {
            if pool.restore(candidate).await {
                restored += 1;
            }
        }
        let bootnodes = pool
            .discover(&self.config.bootnodes, SystemTime::now())
            .await;

        info!(
            "Crawling {} as {local}: {} stored candidates, {} new bootnodes",
            self.config.chain,
            restored,
            bootnodes.len()
        );

        let session = CrawlSession::new(
            self.config.clone(),
            self.transport.clone(),
            self.store.clone(),
            pool,
            shutdown,
        );
        session.coordinate().await;
        Ok(())
    }

    /// Generate public keys at as many log-distances from `target` as the
    /// configured keygen budget allows. See [`keygen::generate`].
    pub async fn generate_keys(
        &self,
        target: &NodeIdentity,
        shutdown: &CancellationToken,
    ) -> BTreeMap<u32, PublicKey> {
        keygen::generate(
            target,
            self.config.keygen_timeout,
            self.config.keygen_concurrency,
            shutdown,
        )
        .await
    }
}
