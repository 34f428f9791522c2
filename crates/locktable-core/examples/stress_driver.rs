//! Randomized multi-client stress driver.
//!
//! Spawns client threads that lock random resource sets in random modes,
//! which deadlocks regularly. Aborted transactions are retried. At the end
//! the driver checks the table is empty and prints the counters as JSON.
//!
//! ```bash
//! RUST_LOG=locktable_core=debug cargo run --example stress_driver -- --threads 8 --transactions 500
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use locktable_core::{LockError, LockManager, LockManagerConfig, ResourceType};

const NODE: ResourceType = ResourceType::new(0, "Node");
const RELATIONSHIP: ResourceType = ResourceType::new(1, "Relationship");

/// Lock table stress driver
#[derive(Parser, Debug)]
#[command(name = "stress_driver")]
#[command(about, long_about = None)]
struct Args {
    /// Config file with a [locks] section
    #[arg(short, long, env = "LOCKTABLE_CONFIG")]
    config: Option<PathBuf>,

    /// Number of client threads
    #[arg(short, long, default_value = "8")]
    threads: usize,

    /// Transactions per thread
    #[arg(long, default_value = "200")]
    transactions: usize,

    /// Distinct resource ids per resource type
    #[arg(short, long, default_value = "32")]
    resources: u64,

    /// Locks taken per transaction
    #[arg(long, default_value = "4")]
    locks_per_tx: usize,

    /// Overrides the configured deadlock check interval (milliseconds)
    #[arg(long)]
    check_interval_ms: Option<u64>,

    /// RNG seed
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Print the final lock table dump
    #[arg(long)]
    dump: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct ThreadReport {
    committed: usize,
    retries: usize,
}

fn run_client(manager: &LockManager, args: &Args, worker: usize) -> anyhow::Result<ThreadReport> {
    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(worker as u64));
    let mut report = ThreadReport::default();

    for tx in 0..args.transactions {
        loop {
            let mut client = manager.new_client_named(format!("t{worker}-tx{tx}"));
            match run_transaction(&mut client, &mut rng, args) {
                Ok(()) => {
                    client.close()?;
                    report.committed += 1;
                    break;
                }
                Err(err) if err.is_retryable() => {
                    tracing::debug!(client = client.name(), error = %err, "transaction aborted, retrying");
                    client.close()?;
                    report.retries += 1;
                }
                Err(err) => return Err(err).context("transaction failed"),
            }
        }
    }
    Ok(report)
}

fn run_transaction(
    client: &mut locktable_core::Client,
    rng: &mut StdRng,
    args: &Args,
) -> Result<(), LockError> {
    for _ in 0..args.locks_per_tx {
        let resource_type = if rng.gen_bool(0.8) { NODE } else { RELATIONSHIP };
        let id = rng.gen_range(0..args.resources);
        if rng.gen_bool(0.5) {
            client.acquire_shared(resource_type, &[id])?;
        } else {
            client.acquire_exclusive(resource_type, &[id])?;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "locktable_core=info,stress_driver=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = LockManagerConfig::load(args.config.as_deref()).context("loading lock config")?;
    if let Some(ms) = args.check_interval_ms {
        config = config.with_deadlock_check_interval(Duration::from_millis(ms));
    }
    let resource_types = config.resource_types.max(2);
    config = config.with_resource_types(resource_types);
    tracing::info!(?config, threads = args.threads, "starting stress run");

    let manager = Arc::new(LockManager::new(config)?);
    let args = Arc::new(args);
    let start = Instant::now();

    let handles: Vec<_> = (0..args.threads)
        .map(|worker| {
            let manager = Arc::clone(&manager);
            let args = Arc::clone(&args);
            thread::spawn(move || run_client(&manager, &args, worker))
        })
        .collect();

    let mut total = ThreadReport::default();
    for handle in handles {
        let report = handle
            .join()
            .map_err(|_| anyhow::anyhow!("client thread panicked"))??;
        total.committed += report.committed;
        total.retries += report.retries;
    }
    let elapsed = start.elapsed();

    tracing::info!(
        committed = total.committed,
        retries = total.retries,
        elapsed_ms = elapsed.as_millis(),
        "stress run finished"
    );

    if args.dump {
        println!("{}", manager.dump().to_json()?);
    }
    println!("{}", serde_json::to_string_pretty(&manager.counters())?);

    let live = manager.live_lock_count();
    if live != 0 {
        bail!("{live} locks still live after every client closed");
    }
    Ok(())
}
