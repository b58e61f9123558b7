//! Generate lookup targets at distinct log-distances from a node.

use clap::Parser;
use log::LevelFilter;
use node_observer_crawler::{keygen, CancellationToken, Node, NodeIdentity};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target node, as an enode URL or a hex encoded public key.
    #[arg(short, long)]
    target: String,

    /// Time budget for the search in milliseconds.
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,

    /// Number of parallel workers.
    #[arg(short, long, default_value = "2")]
    concurrency: usize,

    /// Log level.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn parse_target(target: &str) -> Result<NodeIdentity, Box<dyn std::error::Error>> {
    if target.starts_with("enode://") {
        Ok(target.parse::<Node>()?.identity)
    } else {
        Ok(NodeIdentity::from_hex(target)?)
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

    let target = parse_target(&args.target)?;
    log::info!("Generating keys for {target} ({}ms)", args.timeout_ms);

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let keys = keygen::generate(
        &target,
        Duration::from_millis(args.timeout_ms),
        args.concurrency,
        &shutdown,
    )
    .await;

    for (distance, key) in &keys {
        println!("{distance}\t{}", NodeIdentity::from(*key).public_key_hex());
    }
    log::info!("Found keys at {} distances", keys.len());

    Ok(())
}
