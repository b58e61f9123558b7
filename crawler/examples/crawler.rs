//! Crawl a simulated discovery network.
//!
//! The network lives in memory: every node knows a handful of others and some
//! nodes never answer. The crawl runs until it is interrupted or the duration
//! passes, then the stored results are summarized.

use clap::Parser;
use log::LevelFilter;
use node_observer_crawler::secp256k1::{Secp256k1, SecretKey};
use node_observer_crawler::{
    CancellationToken, Chain, ClientsReport, CrawlerBuilder, HandshakeInfo, MemoryStore, Node,
    NodeId, NodeTransport, StatusReport, TransportError,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Chain the simulated nodes claim to be on.
    #[arg(long, default_value = "mainnet")]
    chain: String,

    /// Number of nodes in the simulated network.
    #[arg(short, long, default_value = "500")]
    nodes: u32,

    /// Every n-th node does not answer pings.
    #[arg(long, default_value = "7")]
    dead_every: u32,

    /// Maximum number of nodes interrogated at once.
    #[arg(short, long, default_value = "16")]
    concurrency: usize,

    /// How long to crawl, in seconds.
    #[arg(short, long, default_value = "10")]
    duration: u64,

    /// Number of clients listed in the final report.
    #[arg(long, default_value = "10")]
    clients_limit: usize,

    /// Log level.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

const CLIENTS: [&str; 4] = [
    "Geth/v1.14.0-stable/linux-amd64/go1.22.2",
    "Geth/v1.13.15-stable/linux-arm64/go1.21.6",
    "Nethermind/v1.25.4+20b10b35/linux-x64/dotnet8.0.2",
    "erigon/v2.60.0/linux-amd64/go1.21.5",
];

/// Simulated node and the indices of its neighbors.
struct SimNode {
    alive: bool,
    client_id: &'static str,
    neighbors: Vec<usize>,
}

/// A [`NodeTransport`] answering from an in-memory topology.
#[derive(Clone)]
struct SimulatedNetwork {
    nodes: Arc<Vec<Node>>,
    index: Arc<HashMap<NodeId, SimNode>>,
}

impl SimulatedNetwork {
    fn new(size: u32, dead_every: u32) -> Result<Self, Box<dyn std::error::Error>> {
        let secp = Secp256k1::new();
        let mut nodes = Vec::new();
        for n in 0..size {
            let mut secret = [0u8; 32];
            secret[0] = 0x42;
            secret[28..].copy_from_slice(&n.to_be_bytes());
            let public = SecretKey::from_slice(&secret)?.public_key(&secp);
            let endpoint = SocketAddr::from(([10, 0, (n >> 8) as u8, n as u8], 30303));
            nodes.push(Node::new(public.into(), endpoint));
        }

        let count = nodes.len();
        let mut index = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            let neighbors = [1, 3, 17, 61]
                .iter()
                .map(|step| (i * 31 + step) % count)
                .collect();
            let alive = dead_every == 0 || (i as u32) % dead_every != dead_every - 1;
            let client_id = CLIENTS[i % CLIENTS.len()];
            index.insert(
                node.id(),
                SimNode {
                    alive,
                    client_id,
                    neighbors,
                },
            );
        }

        Ok(SimulatedNetwork {
            nodes: Arc::new(nodes),
            index: Arc::new(index),
        })
    }

    fn bootnode(&self) -> Option<Node> {
        self.nodes.first().cloned()
    }
}

impl NodeTransport for SimulatedNetwork {
    async fn ping(&self, node: &Node) -> Result<bool, TransportError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(self.index.get(&node.id()).is_some_and(|sim| sim.alive))
    }

    async fn handshake(&self, node: &Node) -> Result<HandshakeInfo, TransportError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let sim = self
            .index
            .get(&node.id())
            .ok_or_else(|| TransportError::ProtocolFailed("unknown node".to_string()))?;
        let neighbors = sim
            .neighbors
            .iter()
            .map(|i| self.nodes[*i].clone())
            .collect();
        Ok(HandshakeInfo::new(Some(sim.client_id.to_string()), neighbors))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} - {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply()?;

    let network = SimulatedNetwork::new(args.nodes, args.dead_every)?;
    let bootnode = network
        .bootnode()
        .ok_or("the simulated network needs at least one node")?;

    let chain: Chain = args.chain.parse()?;
    let store = MemoryStore::new();
    let crawler = CrawlerBuilder::new(chain)
        .with_bootnode(bootnode)
        .with_concurrency_limit(args.concurrency)
        .with_peer_timeout(Duration::from_secs(1))
        .with_status_log_period(Duration::from_secs(2))
        .build(network, store.clone())?;

    let shutdown = CancellationToken::new();
    let stopper = shutdown.clone();
    let duration = Duration::from_secs(args.duration);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = tokio::time::sleep(duration) => {}
        }
        stopper.cancel();
    });

    crawler.run(shutdown).await?;

    let status = StatusReport::create(&store).await?;
    let clients = ClientsReport::create(&store, args.clients_limit).await?;
    println!("Crawl finished, {status}");
    println!("{clients}");
    Ok(())
}
