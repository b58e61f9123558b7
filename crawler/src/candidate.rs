//! Per-node interrogation state.
//!
//! A [`Candidate`] moves through [`Phase`]s as pings and handshakes complete.
//! The phase change itself is decided by [`transition`], a pure function of
//! the current phase, the attempt, its outcome and the try counter. Timestamps
//! are stamped from a caller supplied `now` so the whole lifecycle can be
//! driven without a real clock.

use node_observer_discovery::{Node, NodeId};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Lifecycle phase of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Discovered, never interrogated.
    New,
    /// Answered its most recent ping.
    Pinged,
    /// Missed its most recent ping, more tries allowed.
    PingFailed,
    /// Completed a handshake. Not terminal, the node is re-checked periodically.
    Handshaked,
    /// Failed its most recent handshake, more tries allowed.
    HandshakeFailed,
    /// Ran out of tries. Kept in storage, never scheduled again.
    Abandoned,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::New => "new",
            Phase::Pinged => "pinged",
            Phase::PingFailed => "ping-failed",
            Phase::Handshaked => "handshaked",
            Phase::HandshakeFailed => "handshake-failed",
            Phase::Abandoned => "abandoned",
        };
        write!(f, "{name}")
    }
}

/// Which interrogation step was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Ping,
    Handshake,
}

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn from_success(success: bool) -> Self {
        if success {
            Outcome::Succeeded
        } else {
            Outcome::Failed
        }
    }
}

/// Decide the next phase after an attempt.
///
/// # Arguments
///
/// * `phase` - Phase before the attempt.
/// * `attempt` - The step that was attempted.
/// * `outcome` - How it ended.
/// * `tries` - Consecutive failures of this step, including this attempt.
/// * `max_tries` - Ceiling for consecutive failures of this step.
pub fn transition(
    phase: Phase,
    attempt: Attempt,
    outcome: Outcome,
    tries: u32,
    max_tries: u32,
) -> Phase {
    if phase == Phase::Abandoned {
        return Phase::Abandoned;
    }
    match (attempt, outcome) {
        (Attempt::Ping, Outcome::Succeeded) => match phase {
            Phase::Handshaked => Phase::Handshaked,
            _ => Phase::Pinged,
        },
        (Attempt::Handshake, Outcome::Succeeded) => Phase::Handshaked,
        (_, Outcome::Failed) if tries >= max_tries => Phase::Abandoned,
        (Attempt::Ping, Outcome::Failed) => Phase::PingFailed,
        (Attempt::Handshake, Outcome::Failed) => Phase::HandshakeFailed,
    }
}

/// A discovered node and everything the crawler knows about interrogating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub node: Node,
    pub first_seen: SystemTime,
    pub last_ping: Option<SystemTime>,
    pub last_handshake: Option<SystemTime>,
    /// Consecutive failed pings.
    pub ping_tries: u32,
    /// Consecutive failed handshakes.
    pub handshake_tries: u32,
    pub phase: Phase,
    /// Client software reported by the last successful handshake.
    pub client_id: Option<String>,
}

impl Candidate {
    /// Create a candidate for a node seen for the first time.
    pub fn new(node: Node, now: SystemTime) -> Self {
        Candidate {
            node,
            first_seen: now,
            last_ping: None,
            last_handshake: None,
            ping_tries: 0,
            handshake_tries: 0,
            phase: Phase::New,
            client_id: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// Client name without version or platform, `Geth` for `Geth/v1.14.0/linux-amd64`.
    pub fn client_name(&self) -> Option<&str> {
        let name = self.client_id.as_deref()?.split('/').next()?.trim();
        (!name.is_empty()).then_some(name)
    }

    pub fn is_abandoned(&self) -> bool {
        self.phase == Phase::Abandoned
    }

    /// Whether the node should be pinged: never pinged, or pinged at least
    /// `refresh_timeout` ago.
    pub fn is_ping_due(&self, now: SystemTime, refresh_timeout: Duration) -> bool {
        if self.is_abandoned() {
            return false;
        }
        match self.last_ping {
            None => true,
            Some(last) => elapsed_at_least(last, now, refresh_timeout),
        }
    }

    /// Whether a handshake should follow a successful ping.
    ///
    /// A failed handshake is retried on the next cycle. A successful one is
    /// repeated only once `handshake_refresh_timeout` has passed.
    pub fn is_handshake_due(&self, now: SystemTime, handshake_refresh_timeout: Duration) -> bool {
        if self.is_abandoned() {
            return false;
        }
        if self.handshake_tries > 0 {
            return true;
        }
        match self.last_handshake {
            None => true,
            Some(last) => elapsed_at_least(last, now, handshake_refresh_timeout),
        }
    }

    /// Apply a ping outcome. Returns the new phase.
    pub fn record_ping(&mut self, outcome: Outcome, now: SystemTime, max_tries: u32) -> Phase {
        if self.is_abandoned() {
            return self.phase;
        }
        self.last_ping = Some(now);
        self.ping_tries = match outcome {
            Outcome::Succeeded => 0,
            Outcome::Failed => (self.ping_tries + 1).min(max_tries),
        };
        self.phase = transition(
            self.phase,
            Attempt::Ping,
            outcome,
            self.ping_tries,
            max_tries,
        );
        self.phase
    }

    /// Apply a handshake outcome. Returns the new phase.
    pub fn record_handshake(
        &mut self,
        outcome: Outcome,
        client_id: Option<String>,
        now: SystemTime,
        max_tries: u32,
    ) -> Phase {
        if self.is_abandoned() {
            return self.phase;
        }
        self.last_handshake = Some(now);
        self.handshake_tries = match outcome {
            Outcome::Succeeded => 0,
            Outcome::Failed => (self.handshake_tries + 1).min(max_tries),
        };
        if outcome == Outcome::Succeeded && client_id.is_some() {
            self.client_id = client_id;
        }
        self.phase = transition(
            self.phase,
            Attempt::Handshake,
            outcome,
            self.handshake_tries,
            max_tries,
        );
        self.phase
    }

    /// Merge a rediscovery of the same node. Only the endpoint can change.
    ///
    /// Returns `true` if the stored endpoint was updated.
    pub fn merge(&mut self, node: &Node) -> bool {
        if self.node.endpoint == node.endpoint {
            return false;
        }
        self.node.endpoint = node.endpoint;
        true
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] (ping tries: {}, handshake tries: {})",
            self.node, self.phase, self.ping_tries, self.handshake_tries
        )
    }
}

fn elapsed_at_least(since: SystemTime, now: SystemTime, timeout: Duration) -> bool {
    // A timestamp from the future, e.g. after a clock step, counts as fresh.
    now.duration_since(since)
        .map(|elapsed| elapsed >= timeout)
        .unwrap_or(false)
}
