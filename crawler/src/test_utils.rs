//! Deterministic nodes and scriptable collaborators for unit tests.

use crate::candidate::{Attempt, Candidate};
use crate::store::{MemoryStore, NodeStore, StoreError};
use node_observer_discovery::secp256k1::{Secp256k1, SecretKey};
use node_observer_discovery::{HandshakeInfo, Node, NodeId, NodeTransport, TransportError};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A node with a key and endpoint derived from `n`, so `node(n) == node(n)`.
pub fn node(n: u32) -> Node {
    let endpoint = SocketAddr::from(([10, (n >> 16) as u8, (n >> 8) as u8, n as u8], 30303));
    node_with_endpoint(n, endpoint)
}

/// The same identity as [`node`] at a different endpoint.
pub fn node_at(n: u32, endpoint: &str) -> Node {
    node_with_endpoint(n, endpoint.parse().unwrap())
}

fn node_with_endpoint(n: u32, endpoint: SocketAddr) -> Node {
    let mut secret = [0u8; 32];
    secret[0] = 1;
    secret[28..].copy_from_slice(&n.to_be_bytes());
    let secret = SecretKey::from_slice(&secret).unwrap();
    let public = secret.public_key(&Secp256k1::new());
    Node::new(public.into(), endpoint)
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[derive(Debug, Default)]
struct TransportState {
    delay: Duration,
    delays: HashMap<NodeId, Duration>,
    handshake_delays: HashMap<NodeId, Duration>,
    dead: HashSet<NodeId>,
    failing_handshakes: HashSet<NodeId>,
    neighbors: HashMap<NodeId, Vec<Node>>,
    events: Vec<(NodeId, Attempt)>,
}

/// A [`NodeTransport`] where every node answers unless told otherwise.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

/// Counts an operation as in flight until dropped, also when its future is cancelled.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation takes `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().delay = delay;
        transport
    }

    pub fn set_delay(&self, node: &Node, delay: Duration) {
        self.state.lock().unwrap().delays.insert(node.id(), delay);
    }

    /// Only handshakes with `node` take `delay`, pings use the default.
    pub fn set_handshake_delay(&self, node: &Node, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .handshake_delays
            .insert(node.id(), delay);
    }

    /// Pings to `node` go unanswered.
    pub fn kill(&self, node: &Node) {
        self.state.lock().unwrap().dead.insert(node.id());
    }

    /// `node` answers pings but every handshake fails.
    pub fn fail_handshakes(&self, node: &Node) {
        self.state
            .lock()
            .unwrap()
            .failing_handshakes
            .insert(node.id());
    }

    pub fn set_neighbors(&self, node: &Node, neighbors: Vec<Node>) {
        self.state
            .lock()
            .unwrap()
            .neighbors
            .insert(node.id(), neighbors);
    }

    pub fn ping_count(&self, id: &NodeId) -> usize {
        self.count(id, Attempt::Ping)
    }

    pub fn handshake_count(&self, id: &NodeId) -> usize {
        self.count(id, Attempt::Handshake)
    }

    /// Every attempt in the order it started.
    pub fn events(&self) -> Vec<(NodeId, Attempt)> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn count(&self, id: &NodeId, attempt: Attempt) -> usize {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|(other, a)| other == id && *a == attempt)
            .count()
    }

    /// Record the attempt and return the delay for it.
    fn begin(&self, node: &Node, attempt: Attempt) -> (InFlight, Duration) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        state.events.push((node.id(), attempt));
        let handshake_delay = match attempt {
            Attempt::Handshake => state.handshake_delays.get(&node.id()).copied(),
            Attempt::Ping => None,
        };
        let delay = handshake_delay
            .or_else(|| state.delays.get(&node.id()).copied())
            .unwrap_or(state.delay);
        (InFlight(self.in_flight.clone()), delay)
    }
}

impl NodeTransport for MockTransport {
    async fn ping(&self, node: &Node) -> Result<bool, TransportError> {
        let (_guard, delay) = self.begin(node, Attempt::Ping);
        tokio::time::sleep(delay).await;
        Ok(!self.state.lock().unwrap().dead.contains(&node.id()))
    }

    async fn handshake(&self, node: &Node) -> Result<HandshakeInfo, TransportError> {
        let (_guard, delay) = self.begin(node, Attempt::Handshake);
        tokio::time::sleep(delay).await;

        let state = self.state.lock().unwrap();
        if state.failing_handshakes.contains(&node.id()) {
            return Err(TransportError::ProtocolFailed(
                "disconnected during hello".to_string(),
            ));
        }
        let neighbors = state.neighbors.get(&node.id()).cloned().unwrap_or_default();
        Ok(HandshakeInfo::new(Some("mock/v1.0.0".to_string()), neighbors))
    }
}

/// A [`MemoryStore`] that can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    memory: MemoryStore,
    unavailable: bool,
    failing_upserts: Arc<AtomicUsize>,
    upserts: Arc<Mutex<HashMap<NodeId, usize>>>,
    slow_upserts: Arc<Mutex<HashMap<NodeId, Duration>>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candidates(candidates: Vec<Candidate>) -> Self {
        MockStore {
            memory: MemoryStore::with_candidates(candidates),
            ..Self::default()
        }
    }

    /// Every call fails.
    pub fn unavailable() -> Self {
        MockStore {
            unavailable: true,
            ..Self::default()
        }
    }

    /// The next `n` upserts fail.
    pub fn fail_next_upserts(&self, n: usize) {
        self.failing_upserts.store(n, Ordering::SeqCst);
    }

    /// The next upsert for `id` takes `delay` before it is applied.
    pub fn delay_next_upsert(&self, id: &NodeId, delay: Duration) {
        self.slow_upserts.lock().unwrap().insert(*id, delay);
    }

    /// Successful upserts for `id`.
    pub fn upsert_count(&self, id: &NodeId) -> usize {
        self.upserts.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("mock store is down".to_string()));
        }
        Ok(())
    }
}

impl NodeStore for MockStore {
    async fn upsert_candidate(&self, candidate: &Candidate) -> Result<(), StoreError> {
        self.check()?;
        let failing = self
            .failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("injected upsert failure".to_string()));
        }
        let delay = self.slow_upserts.lock().unwrap().remove(&candidate.id());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.memory.upsert_candidate(candidate).await?;
        *self
            .upserts
            .lock()
            .unwrap()
            .entry(candidate.id())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn count_nodes(&self) -> Result<usize, StoreError> {
        self.check()?;
        self.memory.count_nodes().await
    }

    async fn count_distinct_ips(&self) -> Result<usize, StoreError> {
        self.check()?;
        self.memory.count_distinct_ips().await
    }

    async fn count_clients(&self, limit: usize) -> Result<Vec<(String, usize)>, StoreError> {
        self.check()?;
        self.memory.count_clients(limit).await
    }

    async fn list_seed_candidates(&self) -> Result<Vec<Candidate>, StoreError> {
        self.check()?;
        self.memory.list_seed_candidates().await
    }
}
