mod cache;
mod classify;
mod config;
mod event;
mod http;
mod net;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cache::{CacheBackend, MemoryBackend, SqliteBackend};
use event::{Command, Event};
use net::{HttpNetwork, Network, OfflineNetwork};
use worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "dashcache")]
#[command(about = "Offline-first caching worker for the shop dashboard")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/dashcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Simulate a dead network to exercise the offline fallbacks
  #[arg(long)]
  offline: bool,

  /// Keep the cache in memory instead of the on-disk database
  #[arg(long)]
  ephemeral: bool,

  /// List the keys held in each partition and exit
  #[arg(long)]
  list: bool,

  /// Paths to fetch through the worker (e.g. /index.html /api/customers)
  paths: Vec<String>,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dashcache=info"));

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(io::stderr))
    .with(filter)
    .init();
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  init_tracing();

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  let network: Arc<dyn Network> = if args.offline {
    Arc::new(OfflineNetwork)
  } else {
    Arc::new(HttpNetwork::new()?)
  };

  if args.ephemeral {
    let worker = Worker::new(&config, MemoryBackend::new(), network)?;
    run(worker, &args).await
  } else {
    let worker = Worker::new(&config, SqliteBackend::open()?, network)?;
    run(worker, &args).await
  }
}

/// Drive the worker through its lifecycle, then fetch the requested paths.
async fn run<B: CacheBackend + 'static>(mut worker: Worker<B>, args: &Args) -> Result<()> {
  if args.list {
    for partition in worker.store().partitions()? {
      println!("{}", partition);
      for key in worker.store().keys(&partition)? {
        println!("  {}", key);
      }
    }
    return Ok(());
  }

  if args.offline {
    // Installation needs the network; serve whatever a previous run cached.
    warn!("offline mode: skipping install");
  } else {
    worker.dispatch(Event::Install).await?;
  }

  // The dashboard posts skip-waiting on update so a fresh worker takes over
  // without waiting for old tabs to close.
  worker.dispatch(Event::Message(Command::SkipWaiting)).await?;
  if worker.skip_waiting_requested() {
    worker.dispatch(Event::Activate).await?;
  }

  for path in &args.paths {
    let request = worker.request_for(path)?;
    let url = request.url.clone();

    if let Some(mut response) = worker.dispatch(Event::Fetch(request)).await? {
      let status = response.status();
      let body = response.read_body()?;
      println!("{} -> {} ({} bytes)", url, status, body.len());
      println!("{}", String::from_utf8_lossy(&body));
    }
  }

  Ok(())
}
