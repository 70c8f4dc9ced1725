//! Blockwatch CLI - write threshold monitoring for thin-provisioned block devices

use std::path::{Path, PathBuf};

use anyhow::Context;
use blockwatch_core::{exceeded, BlockGraph, BlockwatchConfig, RequestFlags};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blockwatch")]
#[command(about = "Blockwatch - write threshold events for thin-provisioned block devices")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Check configuration validity and show the resulting node graph
    Check {
        /// Configuration file path
        #[arg(short, long, default_value = "config/blockwatch.json")]
        config: PathBuf,
    },
    /// Issue writes against a node and print threshold events as JSON lines
    Simulate {
        /// Configuration file path
        #[arg(short, long, default_value = "config/blockwatch.json")]
        config: PathBuf,
        /// Node to write to
        #[arg(long)]
        node: String,
        /// Offset of the first write, in bytes
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Length of each write, in bytes
        #[arg(long, default_value_t = 65536)]
        bytes: u64,
        /// Number of back-to-back writes
        #[arg(long, default_value_t = 1)]
        count: u64,
    },
    /// Evaluate the threshold oracle for one request
    Exceeded {
        /// Threshold in bytes, 0 for disabled
        threshold: u64,
        /// Request offset in bytes
        offset: u64,
        /// Request length in bytes
        bytes: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output only.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Check { config }) => check(&config)?,
        Some(Commands::Simulate {
            config,
            node,
            offset,
            bytes,
            count,
        }) => simulate(&config, node, offset, bytes, count).await?,
        Some(Commands::Exceeded {
            threshold,
            offset,
            bytes,
        }) => {
            offset
                .checked_add(bytes)
                .context("offset + bytes overflows a 64-bit byte offset")?;
            println!("{}", exceeded(threshold, offset, bytes));
        }
        None => {
            println!("Blockwatch v{} - Use --help for commands", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn load_graph(path: &Path) -> anyhow::Result<BlockGraph> {
    let config = BlockwatchConfig::load(path)
        .with_context(|| format!("loading {}", path.display()))?;
    Ok(BlockGraph::from_config(&config)?)
}

fn check(path: &Path) -> anyhow::Result<()> {
    let graph = load_graph(path)?;

    println!("Config OK: {}", path.display());
    for name in graph.node_names() {
        let node = graph.find_node(&name)?;
        let threshold = if node.is_filter() {
            graph.filter_threshold(&name)?
        } else {
            graph.query_write_threshold(&name)?
        };
        println!(
            "  {name:<16} {:<16} {:>14} bytes  write-threshold {threshold}",
            node.format_name(),
            node.length()?,
        );
    }
    Ok(())
}

async fn simulate(
    path: &Path,
    node_name: String,
    offset: u64,
    bytes: u64,
    count: u64,
) -> anyhow::Result<()> {
    let graph = load_graph(path)?;
    let node = graph.find_node(&node_name)?;
    let mut events = graph.subscribe();

    let len = usize::try_from(bytes).context("write length does not fit in memory")?;
    let writer = tokio::task::spawn_blocking(move || -> anyhow::Result<u64> {
        let data = vec![0xa5u8; len];
        let mut written = 0;
        for i in 0..count {
            let at = i
                .checked_mul(bytes)
                .and_then(|delta| offset.checked_add(delta))
                .context("write offset overflows")?;
            node.pwrite(at, &data, RequestFlags::empty())
                .with_context(|| format!("write of {bytes} bytes at {at} on '{}'", node.name()))?;
            written += 1;
        }
        Ok(written)
    });

    // The bus closes once the writer and the graph are both gone.
    drop(graph);

    let mut printed = 0u64;
    loop {
        match events.recv().await {
            Ok(event) => {
                println!("{}", serde_json::to_string(&event.to_message())?);
                printed += 1;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber lagged, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }

    let written = writer.await??;
    info!(node = %node_name, written, events = printed, "simulation finished");
    Ok(())
}
