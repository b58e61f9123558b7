//! The set of known candidates, shared between the coordinator and workers.
//!
//! All access goes through [`CandidatePool`], which guards the map with a
//! single lock. A candidate handed out by [`CandidatePool::take_due`] is
//! marked in-flight and is not handed out again until its worker returns it
//! with [`CandidatePool::complete`] or [`CandidatePool::release`]. Whoever
//! holds a candidate in flight is the only one writing it to the store.

use crate::candidate::{Candidate, Phase};
use node_observer_discovery::{Node, NodeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

#[derive(Debug)]
struct Entry {
    candidate: Candidate,
    /// Handed out to a worker.
    in_flight: bool,
    /// The latest snapshot has not reached the store yet.
    unsaved: bool,
}

/// Number of known candidates per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseCounts {
    pub new: usize,
    pub pinged: usize,
    pub ping_failed: usize,
    pub handshaked: usize,
    pub handshake_failed: usize,
    pub abandoned: usize,
}

impl PhaseCounts {
    pub fn total(&self) -> usize {
        self.new
            + self.pinged
            + self.ping_failed
            + self.handshaked
            + self.handshake_failed
            + self.abandoned
    }

    fn add(&mut self, phase: Phase) {
        match phase {
            Phase::New => self.new += 1,
            Phase::Pinged => self.pinged += 1,
            Phase::PingFailed => self.ping_failed += 1,
            Phase::Handshaked => self.handshaked += 1,
            Phase::HandshakeFailed => self.handshake_failed += 1,
            Phase::Abandoned => self.abandoned += 1,
        }
    }
}

/// Shared, synchronized map of candidates keyed by node ID.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    entries: Arc<Mutex<HashMap<NodeId, Entry>>>,
    /// Never admitted, so the crawler does not interrogate itself.
    local_id: NodeId,
}

impl CandidatePool {
    pub fn new(local_id: NodeId) -> Self {
        CandidatePool {
            entries: Arc::new(Mutex::new(HashMap::new())),
            local_id,
        }
    }

    /// Load a persisted candidate. An already known node keeps its in-memory state.
    ///
    /// Returns `true` if the candidate was added.
    pub async fn restore(&self, candidate: Candidate) -> bool {
        let id = candidate.id();
        if id == self.local_id {
            return false;
        }
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&id) {
            return false;
        }
        entries.insert(
            id,
            Entry {
                candidate,
                in_flight: false,
                unsaved: false,
            },
        );
        true
    }

    /// Merge discovered nodes into the pool.
    ///
    /// Unknown nodes become [`Phase::New`] candidates. Known nodes only get
    /// their endpoint refreshed. Created or changed candidates are flagged
    /// unsaved and their snapshots returned; they are persisted through
    /// [`CandidatePool::claim_unsaved`].
    pub async fn discover(&self, nodes: &[Node], now: SystemTime) -> Vec<Candidate> {
        let mut changed = Vec::new();
        let mut entries = self.entries.lock().await;
        for node in nodes {
            let id = node.id();
            if id == self.local_id {
                continue;
            }
            match entries.get_mut(&id) {
                Some(entry) => {
                    // In-flight candidates are overwritten by their worker, skip them.
                    if !entry.in_flight && entry.candidate.merge(node) {
                        entry.unsaved = true;
                        changed.push(entry.candidate.clone());
                    }
                }
                None => {
                    let candidate = Candidate::new(node.clone(), now);
                    changed.push(candidate.clone());
                    entries.insert(
                        id,
                        Entry {
                            candidate,
                            in_flight: false,
                            unsaved: true,
                        },
                    );
                }
            }
        }
        changed
    }

    /// Hand out up to `limit` candidates that are due for a ping.
    ///
    /// Never pinged candidates come first, then the least recently pinged.
    /// Returned candidates are marked in-flight.
    pub async fn take_due(
        &self,
        now: SystemTime,
        refresh_timeout: Duration,
        limit: usize,
    ) -> Vec<Candidate> {
        if limit == 0 {
            return Vec::new();
        }
        let mut entries = self.entries.lock().await;

        let mut due: Vec<(Option<SystemTime>, NodeId)> = entries
            .iter()
            .filter(|(_, entry)| {
                !entry.in_flight && entry.candidate.is_ping_due(now, refresh_timeout)
            })
            .map(|(id, entry)| (entry.candidate.last_ping, *id))
            .collect();
        // `None` sorts before any `Some`.
        due.sort_unstable();
        due.truncate(limit);

        due.into_iter()
            .filter_map(|(_, id)| {
                let entry = entries.get_mut(&id)?;
                entry.in_flight = true;
                Some(entry.candidate.clone())
            })
            .collect()
    }

    /// Return a worked candidate to the pool with its new state.
    ///
    /// # Arguments
    ///
    /// * `candidate` - The updated candidate.
    /// * `saved` - Whether its latest snapshot reached the store.
    pub async fn complete(&self, candidate: Candidate, saved: bool) {
        let mut entries = self.entries.lock().await;
        let id = candidate.id();
        match entries.get_mut(&id) {
            Some(entry) => {
                entry.candidate = candidate;
                entry.in_flight = false;
                entry.unsaved = !saved;
            }
            None => {
                entries.insert(
                    id,
                    Entry {
                        candidate,
                        in_flight: false,
                        unsaved: !saved,
                    },
                );
            }
        }
    }

    /// Return a candidate to the pool without changing its state.
    pub async fn release(&self, id: &NodeId) {
        if let Some(entry) = self.entries.lock().await.get_mut(id) {
            entry.in_flight = false;
        }
    }

    /// Take candidates whose latest state has not been persisted.
    ///
    /// Returned candidates are marked in-flight so no worker picks them up
    /// while they are written. Hand each back with [`CandidatePool::complete`].
    /// In-flight candidates are skipped, their worker persists them.
    pub async fn claim_unsaved(&self) -> Vec<Candidate> {
        self.entries
            .lock()
            .await
            .values_mut()
            .filter(|entry| entry.unsaved && !entry.in_flight)
            .map(|entry| {
                entry.in_flight = true;
                entry.candidate.clone()
            })
            .collect()
    }

    pub async fn phase_counts(&self) -> PhaseCounts {
        let mut counts = PhaseCounts::default();
        for entry in self.entries.lock().await.values() {
            counts.add(entry.candidate.phase);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Outcome;
    use crate::test_utils::{node, node_at};

    const REFRESH: Duration = Duration::from_secs(100);

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn pool() -> CandidatePool {
        CandidatePool::new(node(999).id())
    }

    #[tokio::test]
    async fn test_discover_dedups() {
        let pool = pool();
        let created = pool.discover(&[node(1), node(2), node(1)], at(0)).await;
        assert_eq!(created.len(), 2);
        assert_eq!(pool.phase_counts().await.new, 2);

        // Rediscovery at the same endpoint changes nothing.
        assert!(pool.discover(&[node(1)], at(1)).await.is_empty());

        // A new endpoint is merged, the state is kept.
        let moved = node_at(1, "10.9.9.9:30303");
        let changed = pool.discover(&[moved.clone()], at(2)).await;
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].node.endpoint, moved.endpoint);
        assert_eq!(changed[0].first_seen, at(0));
    }

    #[tokio::test]
    async fn test_local_node_ignored() {
        let pool = pool();
        assert!(pool.discover(&[node(999)], at(0)).await.is_empty());
        assert!(!pool.restore(Candidate::new(node(999), at(0))).await);
        assert_eq!(pool.phase_counts().await.total(), 0);
    }

    #[tokio::test]
    async fn test_take_due_marks_in_flight() {
        let pool = pool();
        pool.discover(&[node(1), node(2), node(3)], at(0)).await;

        let first = pool.take_due(at(0), REFRESH, 2).await;
        assert_eq!(first.len(), 2);

        let second = pool.take_due(at(0), REFRESH, 10).await;
        assert_eq!(second.len(), 1);
        assert!(first.iter().all(|c| c.id() != second[0].id()));
        assert!(pool.take_due(at(0), REFRESH, 10).await.is_empty());

        pool.release(&second[0].id()).await;
        assert_eq!(pool.take_due(at(0), REFRESH, 10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_take_due_prefers_stale() {
        let pool = pool();
        let mut old = Candidate::new(node(1), at(0));
        old.record_ping(Outcome::Succeeded, at(10), 3);
        let mut older = Candidate::new(node(2), at(0));
        older.record_ping(Outcome::Succeeded, at(5), 3);
        let mut fresh = Candidate::new(node(3), at(0));
        fresh.record_ping(Outcome::Succeeded, at(500), 3);
        pool.restore(old).await;
        pool.restore(older).await;
        pool.restore(fresh).await;
        pool.discover(&[node(4)], at(0)).await;

        let due = pool.take_due(at(200), REFRESH, 10).await;
        let ids: Vec<_> = due.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![node(4).id(), node(2).id(), node(1).id()]);
    }

    #[tokio::test]
    async fn test_abandoned_never_due() {
        let pool = pool();
        let mut candidate = Candidate::new(node(1), at(0));
        for i in 0..3 {
            candidate.record_ping(Outcome::Failed, at(i), 3);
        }
        pool.restore(candidate).await;
        assert!(pool.take_due(at(1_000_000), REFRESH, 10).await.is_empty());
        assert_eq!(pool.phase_counts().await.abandoned, 1);
    }

    #[tokio::test]
    async fn test_unsaved_tracking() {
        let pool = pool();
        let created = pool.discover(&[node(1)], at(0)).await;

        let claimed = pool.claim_unsaved().await;
        assert_eq!(claimed, created);
        // Claimed candidates are neither due nor claimed twice.
        assert!(pool.take_due(at(0), REFRESH, 10).await.is_empty());
        assert!(pool.claim_unsaved().await.is_empty());

        // A failed write leaves the flag set.
        pool.complete(claimed[0].clone(), false).await;
        let claimed = pool.claim_unsaved().await;
        assert_eq!(claimed.len(), 1);
        pool.complete(claimed[0].clone(), true).await;
        assert!(pool.claim_unsaved().await.is_empty());

        let mut taken = pool.take_due(at(0), REFRESH, 1).await.remove(0);
        taken.record_ping(Outcome::Succeeded, at(1), 3);
        pool.complete(taken.clone(), false).await;
        assert_eq!(pool.claim_unsaved().await, vec![taken]);
    }

    #[tokio::test]
    async fn test_discover_skips_in_flight() {
        let pool = pool();
        pool.discover(&[node(1)], at(0)).await;
        let taken = pool.take_due(at(0), REFRESH, 1).await;
        assert_eq!(taken.len(), 1);

        let moved = node_at(1, "10.9.9.9:30303");
        assert!(pool.discover(&[moved], at(1)).await.is_empty());
        assert!(pool.claim_unsaved().await.is_empty());
    }
}
