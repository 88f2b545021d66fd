//! Engine binary
//!
//! Wires the in-memory repository and historian (optionally seeded
//! from a JSON block file) around the durable point store and runs
//! the supervisor until interrupted. Production deployments replace
//! the repository and historian with their database-backed
//! implementations.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tagrun::repo::{MemoryHistorian, MemoryRepository, SeedConfig};
use tagrun::store::PointStore;
use tagrun::time::SysClock;
use tagrun::{EngineContext, EngineSettings, Supervisor};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tagrun", about = "Soft-realtime memory-block execution runtime")]
struct Cli {
    /// Settings file (TOML); TAGRUN_* environment variables override
    #[arg(long, env = "TAGRUN_CONFIG")]
    config: Option<PathBuf>,

    /// Durable point-store directory, overriding the settings file
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON seed with points and memory blocks for standalone runs
    #[arg(long)]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut settings = EngineSettings::load(cli.config.as_deref()).context("loading settings")?;
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir;
    }

    let seed = match &cli.seed {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading seed {}", path.display()))?;
            serde_json::from_str::<SeedConfig>(&text)
                .with_context(|| format!("parsing seed {}", path.display()))?
        }
        None => SeedConfig::default(),
    };

    let store = Arc::new(PointStore::open(&settings.data_dir).context("opening point store")?);
    let repo = Arc::new(MemoryRepository::from_seed(seed));
    let historian = Arc::new(MemoryHistorian::new());
    let clock = Arc::new(SysClock::new());

    let ctx = EngineContext::new(repo, historian, store, clock, settings);
    let supervisor = Supervisor::new(ctx);
    supervisor.start().await.context("starting engine")?;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown signal received");
    supervisor.shutdown().await;
    Ok(())
}
