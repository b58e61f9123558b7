//! Persistence contract for crawl results.
//!
//! The crawler writes every candidate transition through [`NodeStore`] and
//! reads its starting set from it. [`MemoryStore`] keeps everything in a map,
//! which is enough for short crawls, examples and tests.

use crate::candidate::{Candidate, Phase};
use node_observer_discovery::NodeId;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};

/// Errors reported by a [`NodeStore`].
#[derive(Debug)]
pub enum StoreError {
    /// The backing store cannot be reached.
    Unavailable(String),
    /// An I/O error occurred while reading or writing.
    Io(io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(reason) => write!(f, "Node store unavailable: {reason}"),
            StoreError::Io(err) => write!(f, "Node store I/O error: {err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Unavailable(_) => None,
            StoreError::Io(err) => Some(err),
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err)
    }
}

/// Storage of discovered nodes and aggregate queries over them.
///
/// Writes for distinct candidates are independent, and the crawler may write
/// the same snapshot more than once, so `upsert_candidate` must be idempotent.
pub trait NodeStore: Clone + Send + Sync + 'static {
    /// Insert the candidate, or replace the stored record with the same node ID.
    fn upsert_candidate(
        &self,
        candidate: &Candidate,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Number of stored nodes.
    fn count_nodes(&self) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Number of distinct IP addresses among stored nodes.
    fn count_distinct_ips(&self) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Handshaked nodes per client name, most common first, at most `limit` entries.
    ///
    /// Ties are ordered by name.
    fn count_clients(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<(String, usize)>, StoreError>> + Send;

    /// Previously stored candidates to resume crawling from.
    fn list_seed_candidates(
        &self,
    ) -> impl Future<Output = Result<Vec<Candidate>, StoreError>> + Send;
}

/// A [`NodeStore`] backed by an in-process map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    nodes: Arc<Mutex<HashMap<NodeId, Candidate>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with candidates, as if from an earlier run.
    pub fn with_candidates(candidates: impl IntoIterator<Item = Candidate>) -> Self {
        let nodes = candidates
            .into_iter()
            .map(|candidate| (candidate.id(), candidate))
            .collect();
        MemoryStore {
            nodes: Arc::new(Mutex::new(nodes)),
        }
    }

    /// Stored snapshot of a single node.
    pub fn get(&self, id: &NodeId) -> Option<Candidate> {
        self.lock().ok()?.get(id).cloned()
    }

    /// Stored snapshots of all nodes.
    pub fn snapshot(&self) -> Vec<Candidate> {
        match self.lock() {
            Ok(nodes) => nodes.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<NodeId, Candidate>>, StoreError> {
        self.nodes
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl NodeStore for MemoryStore {
    async fn upsert_candidate(&self, candidate: &Candidate) -> Result<(), StoreError> {
        self.lock()?.insert(candidate.id(), candidate.clone());
        Ok(())
    }

    async fn count_nodes(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }

    async fn count_distinct_ips(&self) -> Result<usize, StoreError> {
        let nodes = self.lock()?;
        let ips: HashSet<_> = nodes.values().map(|c| c.node.endpoint.ip()).collect();
        Ok(ips.len())
    }

    async fn count_clients(&self, limit: usize) -> Result<Vec<(String, usize)>, StoreError> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for candidate in self.lock()?.values() {
            if candidate.phase != Phase::Handshaked {
                continue;
            }
            if let Some(name) = candidate.client_name() {
                *counts.entry(name.to_string()).or_insert(0) += 1;
            }
        }

        let mut clients: Vec<_> = counts.into_iter().collect();
        clients.sort_by(|(a_name, a_count), (b_name, b_count)| {
            b_count.cmp(a_count).then_with(|| a_name.cmp(b_name))
        });
        clients.truncate(limit);
        Ok(clients)
    }

    async fn list_seed_candidates(&self) -> Result<Vec<Candidate>, StoreError> {
        Ok(self.lock()?.values().cloned().collect())
    }
}
