//! Bucket key generation.
//!
//! To ask a node for the contents of one of its buckets, a lookup target
//! must sit at that bucket's log-distance from the node. Such targets can only
//! be found by brute force: generate random key pairs, derive their node IDs
//! and keep whatever lands at a new distance. [`generate`] runs that search
//! on a fixed number of blocking workers for a bounded amount of time.

use log::debug;
use node_observer_discovery::secp256k1::{rand, PublicKey, Secp256k1};
use node_observer_discovery::{log_distance, NodeId, NodeIdentity};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A generated public key and the log-distance of its node ID from the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyGenResult {
    pub public_key: PublicKey,
    pub distance: u32,
}

/// Search for public keys at distinct log-distances from `target`.
///
/// Spawns `concurrency` workers (at least one) that generate random key pairs
/// and report every result through a bounded channel. The collector keeps the
/// most recent key seen per distance. Workers stop once `timeout` elapses or
/// `shutdown` is cancelled, and the collector returns after all of them have
/// stopped.
///
/// Close distances are exponentially rare, so the result usually covers only
/// the top few buckets. A partial result is not an error.
///
/// # Arguments
///
/// * `target` - Identity whose buckets the keys should fall into.
/// * `timeout` - Time budget for the search.
/// * `concurrency` - Number of parallel workers.
/// * `shutdown` - Stops the search early when cancelled.
///
/// # Returns
///
/// Generated public keys keyed by their log-distance from `target`.
pub async fn generate(
    target: &NodeIdentity,
    timeout: Duration,
    concurrency: usize,
    shutdown: &CancellationToken,
) -> BTreeMap<u32, PublicKey> {
    let workers = concurrency.max(1);
    let target_id = target.id();
    let stop = shutdown.child_token();
    let started = Instant::now();

    let (result_tx, mut result_rx) = mpsc::channel(workers);
    for _ in 0..workers {
        let result_tx = result_tx.clone();
        let stop = stop.clone();
        tokio::task::spawn_blocking(move || search(target_id, result_tx, stop));
    }
    // Only the workers hold senders now, the channel closes when the last one exits.
    drop(result_tx);

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut keys = BTreeMap::new();
    let mut generated: u64 = 0;
    loop {
        tokio::select! {
            result = result_rx.recv() => match result {
                Some(KeyGenResult { public_key, distance }) => {
                    generated += 1;
                    keys.insert(distance, public_key);
                }
                None => break,
            },
            _ = &mut deadline, if !stop.is_cancelled() => stop.cancel(),
        }
    }

    debug!(
        "Generated {} keys covering {} distances from {} in {:?}",
        generated,
        keys.len(),
        target,
        started.elapsed()
    );
    keys
}

/// Worker loop, runs on a blocking thread until `stop` is cancelled or the collector is gone.
fn search(target: NodeId, result_tx: mpsc::Sender<KeyGenResult>, stop: CancellationToken) {
    let secp = Secp256k1::new();
    let mut rng = rand::thread_rng();

    while !stop.is_cancelled() {
        let (_, public_key) = secp.generate_keypair(&mut rng);
        let distance = log_distance(&target, &NodeId::from_public_key(&public_key));

        // The collector drains until every sender is dropped, so this cannot block forever.
        if result_tx
            .blocking_send(KeyGenResult {
                public_key,
                distance,
            })
            .is_err()
        {
            break;
        }
    }
}
