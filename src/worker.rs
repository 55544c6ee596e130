//! The worker: holds the store, network, and manifest, and dispatches
//! lifecycle events to the matching handler.

use color_eyre::Result;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::cache::{CacheBackend, CacheNames, CacheStore, Strategies};
use crate::classify::{classify, ShellManifest, Strategy};
use crate::config::Config;
use crate::event::{Command, Event};
use crate::http::{Request, Response};
use crate::net::Network;

/// Where the worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
  /// Registered, shell not yet precached.
  Idle,
  /// Install complete; waiting to take over from a previous version.
  Waiting,
  /// Activated and controlling all clients.
  Active,
}

/// The offline-caching worker.
///
/// One instance per process. Owns the partitions through the cache store and
/// answers every intercepted request with *some* response: live, cached, or a
/// synthesized offline placeholder.
pub struct Worker<B: CacheBackend> {
  store: CacheStore<B>,
  strategies: Strategies<B>,
  network: Arc<dyn Network>,
  manifest: ShellManifest,
  api_prefix: String,
  origin: Url,
  phase: WorkerPhase,
  skip_waiting: bool,
}

impl<B: CacheBackend + 'static> Worker<B> {
  pub fn new(config: &Config, backend: B, network: Arc<dyn Network>) -> Result<Self> {
    let names = CacheNames::for_version(&config.cache_version);
    let store = CacheStore::new(backend, names);
    let strategies = Strategies::new(store.clone(), Arc::clone(&network));

    Ok(Self {
      store,
      strategies,
      network,
      manifest: ShellManifest::new(config.shell_manifest.clone()),
      api_prefix: config.api_prefix.clone(),
      origin: config.origin()?,
      phase: WorkerPhase::Idle,
      skip_waiting: false,
    })
  }

  #[allow(dead_code)]
  pub fn phase(&self) -> WorkerPhase {
    self.phase
  }

  /// True once a skip-waiting command has been received.
  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting
  }

  pub fn store(&self) -> &CacheStore<B> {
    &self.store
  }

  /// Build a request for a path relative to the upstream origin.
  pub fn request_for(&self, path: &str) -> Result<Request> {
    let url = self
      .origin
      .join(path)
      .map_err(|e| color_eyre::eyre::eyre!("Invalid path {}: {}", path, e))?;
    Ok(Request::get(url))
  }

  /// Route a tagged event to its handler.
  ///
  /// Only fetch events produce a response; lifecycle events return `None`.
  pub async fn dispatch(&mut self, event: Event) -> Result<Option<Response>> {
    match event {
      Event::Install => {
        self.install().await?;
        Ok(None)
      }
      Event::Activate => {
        self.activate()?;
        Ok(None)
      }
      Event::Fetch(request) => Ok(Some(self.handle_fetch(&request).await?)),
      Event::Message(command) => {
        self.handle_message(command);
        Ok(None)
      }
    }
  }

  /// Precache the shell. A failure leaves no partial shell partition and the
  /// host is expected to retry installation.
  pub async fn install(&mut self) -> Result<()> {
    self
      .store
      .install(&self.manifest, &self.origin, self.network.as_ref())
      .await?;

    self.phase = WorkerPhase::Waiting;
    Ok(())
  }

  /// Drop orphaned partitions, then take control of all open clients.
  /// Partition cleanup completes before any fetch is answered as controller.
  pub fn activate(&mut self) -> Result<()> {
    self.store.activate()?;
    self.phase = WorkerPhase::Active;
    info!("worker active, controlling clients");
    Ok(())
  }

  fn handle_message(&mut self, command: Command) {
    match command {
      Command::SkipWaiting => {
        self.skip_waiting = true;
        info!("skip-waiting requested");
      }
    }
  }

  /// Classify and handle one intercepted request.
  pub async fn handle_fetch(&self, request: &Request) -> Result<Response> {
    match classify(request, &self.api_prefix, &self.manifest) {
      Strategy::Api => Ok(self.strategies.network_first(request).await),
      Strategy::AppShell => Ok(self.strategies.cache_first(request).await),
      Strategy::Generic => self.strategies.stale_while_revalidate(request).await,
    }
  }
}
