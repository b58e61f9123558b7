//! Internal session coordination for crawling operations.
//!
//! This module contains the [`CrawlSession`] which orchestrates the crawl by
//! pulling due candidates from the [`CandidatePool`] and running a bounded
//! number of interrogation tasks.

use crate::builder::CrawlerConfig;
use crate::candidate::{Candidate, Outcome, Phase};
use crate::pool::CandidatePool;
use crate::status::StatusReport;
use crate::store::NodeStore;
use log::{debug, info, warn};
use node_observer_discovery::{NodeTransport, TransportError};
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Result of interrogating a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskResult {
    /// Answered the ping, handshake not due.
    Pinged,
    /// Answered the ping and completed a handshake.
    Handshaked { discovered: usize },
    /// Missed the ping, will be retried.
    PingFailed,
    /// Answered the ping but failed the handshake, will be retried.
    HandshakeFailed,
    /// Ran out of tries.
    Abandoned,
    /// Stopped by shutdown before an attempt completed.
    Cancelled,
}

/// Internal coordinator for a crawling session.
///
/// # Architecture
///
/// * **Coordinator** (`coordinate()`) - Selects due candidates and spawns tasks, never more
///   than the concurrency limit at once.
/// * **Processors** (`process()`) - Ping, then maybe handshake, one candidate each. Every
///   transition is persisted before the candidate goes back to the pool.
///
/// Discovered candidates are written by the coordinator before they can be
/// handed out, so a creation snapshot never lands after a later transition.
#[derive(Clone)]
pub(crate) struct CrawlSession<T, S> {
    config: Arc<CrawlerConfig>,
    transport: T,
    store: S,
    pool: CandidatePool,
    shutdown: CancellationToken,
}

impl<T: NodeTransport, S: NodeStore> CrawlSession<T, S> {
    pub fn new(
        config: Arc<CrawlerConfig>,
        transport: T,
        store: S,
        pool: CandidatePool,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            transport,
            store,
            pool,
            shutdown,
        }
    }

    /// Run a transport operation bounded by the peer timeout.
    ///
    /// Returns `None` if the crawl was cancelled before the operation finished.
    async fn interrogate<R>(
        &self,
        operation: impl Future<Output = Result<R, TransportError>>,
    ) -> Option<Result<R, TransportError>> {
        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return None,
            result = timeout(self.config.peer_timeout, operation) => {
                result.unwrap_or(Err(TransportError::Timeout))
            }
        };
        match result {
            Err(TransportError::Cancelled) => None,
            result => Some(result),
        }
    }

    /// Write a candidate snapshot to the store.
    ///
    /// Failures are logged and reported as `false`, the caller leaves the
    /// candidate marked unsaved so the next cycle retries.
    async fn persist(&self, candidate: &Candidate) -> bool {
        match self.store.upsert_candidate(candidate).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to persist {candidate}, retrying next cycle: {e}");
                false
            }
        }
    }

    /// Interrogates a single candidate: pings it and, if due, handshakes it.
    ///
    /// # Arguments
    ///
    /// * `candidate` - An in-flight candidate handed out by the pool.
    async fn process(&self, mut candidate: Candidate) -> TaskResult {
        debug!("Processing candidate {candidate}");
        let id = candidate.id();

        let alive = match self.interrogate(self.transport.ping(&candidate.node)).await {
            Some(Ok(alive)) => alive,
            Some(Err(e)) => {
                debug!("Ping to {} failed: {e}", candidate.node);
                false
            }
            None => {
                self.pool.release(&id).await;
                return TaskResult::Cancelled;
            }
        };

        let phase = candidate.record_ping(
            Outcome::from_success(alive),
            SystemTime::now(),
            self.config.max_ping_tries,
        );
        let saved = self.persist(&candidate).await;

        if !alive {
            self.pool.complete(candidate, saved).await;
            return match phase {
                Phase::Abandoned => TaskResult::Abandoned,
                _ => TaskResult::PingFailed,
            };
        }

        if !candidate.is_handshake_due(SystemTime::now(), self.config.handshake_refresh_timeout)
        {
            self.pool.complete(candidate, saved).await;
            return TaskResult::Pinged;
        }

        let handshake = match self
            .interrogate(self.transport.handshake(&candidate.node))
            .await
        {
            Some(result) => result,
            None => {
                // The ping result is already recorded.
                self.pool.complete(candidate, saved).await;
                return TaskResult::Cancelled;
            }
        };

        let now = SystemTime::now();
        let (phase, neighbors) = match handshake {
            Ok(info) => {
                let phase = candidate.record_handshake(
                    Outcome::Succeeded,
                    info.client_id,
                    now,
                    self.config.max_handshake_tries,
                );
                (phase, info.neighbors)
            }
            Err(e) => {
                debug!("Handshake with {} failed: {e}", candidate.node);
                let phase = candidate.record_handshake(
                    Outcome::Failed,
                    None,
                    now,
                    self.config.max_handshake_tries,
                );
                (phase, Vec::new())
            }
        };
        let saved = self.persist(&candidate).await;
        self.pool.complete(candidate, saved).await;

        match phase {
            Phase::Handshaked => TaskResult::Handshaked {
                discovered: self.pool.discover(&neighbors, now).await.len(),
            },
            Phase::Abandoned => TaskResult::Abandoned,
            _ => TaskResult::HandshakeFailed,
        }
    }

    /// Write new and changed candidates, and retry writes that failed earlier.
    async fn flush_unsaved(&self) {
        for candidate in self.pool.claim_unsaved().await {
            let saved = self.persist(&candidate).await;
            self.pool.complete(candidate, saved).await;
        }
    }

    async fn log_status(&self, active_tasks: usize) {
        let counts = self.pool.phase_counts().await;
        info!(
            "{} active tasks (max: {}), {} candidates known ({} handshaked, {} abandoned)",
            active_tasks,
            self.config.concurrency_limit,
            counts.total(),
            counts.handshaked,
            counts.abandoned
        );
        match StatusReport::create(&self.store).await {
            Ok(report) => info!("Stored nodes {report}"),
            Err(e) => warn!("Failed to create status report: {e}"),
        }
    }

    /// Coordinates the crawl until the shutdown token is cancelled.
    ///
    /// This is the main control loop. It persists pending candidates, hands
    /// due candidates to new tasks while below the concurrency limit, then
    /// waits for a task to finish, the poll timer, the status timer, or
    /// shutdown.
    ///
    /// # Termination
    ///
    /// On shutdown no further tasks are spawned. In-flight tasks observe the
    /// same token and abort their pending transport call. The loop waits for
    /// every task to exit and flushes unsaved candidates before returning.
    pub async fn coordinate(&self) {
        let limit = self.config.concurrency_limit;
        let mut tasks = JoinSet::new();

        let mut poll = interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status = interval(self.config.status_log_period);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.flush_unsaved().await;

            let free = limit.saturating_sub(tasks.len());
            if free > 0 {
                let batch = self
                    .pool
                    .take_due(SystemTime::now(), self.config.refresh_timeout, free)
                    .await;
                for candidate in batch {
                    let session = self.clone();
                    tasks.spawn(async move { session.process(candidate).await });
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(joined) = tasks.join_next() => log_joined(joined),
                // Rescan for due candidates and failed writes.
                _ = poll.tick() => {}
                _ = status.tick() => self.log_status(tasks.len()).await,
            }
        }

        info!("Crawler stopping, waiting for {} active tasks", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            log_joined(joined);
        }
        self.flush_unsaved().await;
        info!("Crawler stopped");
    }
}

fn log_joined(joined: Result<TaskResult, JoinError>) {
    match joined {
        Ok(TaskResult::Handshaked { discovered }) if discovered > 0 => {
            debug!("Task completed with handshake, {discovered} new candidates")
        }
        Ok(result) => debug!("Task completed with result: {result:?}"),
        Err(e) => warn!("Crawl task failed: {e}"),
    }
}
