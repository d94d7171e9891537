//! labelhouse writer binary
//!
//! Reads JSON-lines samples from stdin and writes them through the
//! schema-on-write pipeline. Stops on EOF or Ctrl+C after draining the queue.

use labelhouse::sample::Sample;
use labelhouse::store::{MemoryStore, Store};
use labelhouse::telemetry::Telemetry;
use labelhouse::writer::Writer;
use labelhouse::{Config, Error};

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// labelhouse writer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target database (overrides LABELHOUSE_DATABASE)
    #[arg(long)]
    database: Option<String>,

    /// Cluster name (overrides LABELHOUSE_CLUSTER)
    #[arg(long)]
    cluster: Option<String>,

    /// Label column prefix (overrides LABELHOUSE_COLUMN_PREFIX)
    #[arg(long)]
    column_prefix: Option<String>,

    /// Samples per flush cycle (overrides LABELHOUSE_BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Max wait for a full batch in milliseconds (overrides LABELHOUSE_BATCH_TIMEOUT_MS)
    #[arg(long)]
    batch_timeout_ms: Option<u64>,

    /// Metric groups committed concurrently (overrides LABELHOUSE_GROUP_PARALLELISM)
    #[arg(long)]
    group_parallelism: Option<usize>,

    /// Inbound queue capacity
    #[arg(long, env = "LABELHOUSE_CHANNEL_CAPACITY", default_value = "65536")]
    channel_capacity: usize,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(database) = &self.database {
            config.schema.database = database.clone();
        }
        if let Some(cluster) = &self.cluster {
            config.schema.cluster = cluster.clone();
        }
        if let Some(prefix) = &self.column_prefix {
            config.schema.column_prefix = prefix.clone();
        }
        if let Some(size) = self.batch_size {
            config.dispatcher.batch_size = size;
        }
        if let Some(ms) = self.batch_timeout_ms {
            config.dispatcher.batch_timeout = Duration::from_millis(ms);
        }
        if let Some(parallelism) = self.group_parallelism {
            config.dispatcher.group_parallelism = parallelism;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _telemetry = Telemetry::init_for_component("labelhouse-writer", &args.log_level)?;

    let mut config = Config::from_env()?;
    args.apply(&mut config);
    config.validate()?;
    if args.channel_capacity == 0 {
        return Err(Error::Config("channel capacity must be at least 1".to_string()).into());
    }

    info!(
        database = %config.schema.database,
        cluster = %config.schema.cluster,
        column_prefix = %config.schema.column_prefix,
        batch_size = config.dispatcher.batch_size,
        batch_timeout_ms = config.dispatcher.batch_timeout.as_millis() as u64,
        group_parallelism = config.dispatcher.group_parallelism,
        "Starting labelhouse writer"
    );

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let writer = Writer::connect(config, store).await?;

    let (tx, rx) = mpsc::channel(args.channel_capacity);
    let handle = writer.start(rx);

    tokio::select! {
        result = read_samples(tx) => {
            let (read, rejected) = result?;
            info!(read, rejected, "Input exhausted, draining queue");
        }
        _ = shutdown_signal() => {
            info!("Shutdown requested, draining queue");
        }
    }

    let stats = handle.wait().await?;
    info!(
        accepted = stats.accepted,
        failed = stats.failed,
        cycles = stats.cycles,
        groups_committed = stats.groups_committed,
        groups_failed = stats.groups_failed,
        schemas_created = stats.schemas_created,
        "Writer stopped"
    );

    Ok(())
}

/// Forward stdin samples into the queue. The sender is dropped on return.
async fn read_samples(tx: mpsc::Sender<Sample>) -> labelhouse::Result<(u64, u64)> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut read = 0u64;
    let mut rejected = 0u64;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let sample: Sample = match serde_json::from_str(line) {
            Ok(sample) => sample,
            Err(e) => {
                rejected += 1;
                warn!(error = %e, "Skipping unparseable sample");
                continue;
            }
        };
        if tx.send(sample).await.is_err() {
            debug!("Dispatcher stopped, no longer reading input");
            break;
        }
        read += 1;
    }

    Ok((read, rejected))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
