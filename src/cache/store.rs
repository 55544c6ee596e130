//! Cache store manager: partition naming, install and activate lifecycle.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::info;
use url::Url;

use super::backend::CacheBackend;
use crate::classify::ShellManifest;
use crate::http::{Request, StoredResponse};
use crate::net::Network;

/// Version-qualified names of the three partitions.
///
/// Bumping the version yields fresh, empty partitions; partitions under old
/// names become orphans and are deleted by [`CacheStore::activate`].
#[derive(Debug, Clone)]
pub struct CacheNames {
  pub shell: String,
  pub assets: String,
  pub api: String,
}

impl CacheNames {
  pub fn for_version(version: &str) -> Self {
    Self {
      shell: format!("{}-shell", version),
      assets: format!("{}-assets", version),
      api: format!("{}-api", version),
    }
  }

  fn current(&self) -> [&str; 3] {
    [&self.shell, &self.assets, &self.api]
  }
}

/// Owns the cache partitions. Strategies read and write through this type;
/// nothing else touches the backend.
pub struct CacheStore<B: CacheBackend> {
  backend: Arc<B>,
  names: CacheNames,
}

impl<B: CacheBackend> CacheStore<B> {
  pub fn new(backend: B, names: CacheNames) -> Self {
    Self {
      backend: Arc::new(backend),
      names,
    }
  }

  pub fn names(&self) -> &CacheNames {
    &self.names
  }

  /// Look up a cached response by request identity.
  pub fn lookup(&self, partition: &str, request: &Request) -> Result<Option<StoredResponse>> {
    self.backend.get(partition, &request.cache_key())
  }

  /// Store a response snapshot under the request's identity.
  pub fn store(&self, partition: &str, request: &Request, response: &StoredResponse) -> Result<()> {
    self.backend.put(partition, &request.cache_key(), response)
  }

  /// Request keys currently held in a partition.
  pub fn keys(&self, partition: &str) -> Result<Vec<String>> {
    self.backend.keys(partition)
  }

  pub fn partitions(&self) -> Result<Vec<String>> {
    self.backend.partitions()
  }

  /// Precache every manifest path into the shell partition.
  ///
  /// All manifest fetches must succeed (transport and 2xx status) before
  /// anything is written, so a failed install never leaves a partial shell
  /// partition behind. Safe to re-run; entries are overwritten by key.
  pub async fn install(
    &self,
    manifest: &ShellManifest,
    origin: &Url,
    network: &dyn Network,
  ) -> Result<()> {
    let mut requests = Vec::with_capacity(manifest.len());
    for path in manifest.entries() {
      let url = origin
        .join(path)
        .map_err(|e| eyre!("Invalid manifest path {}: {}", path, e))?;
      requests.push(Request::get(url));
    }

    let fetches = requests.iter().map(|request| async move {
      let response = network
        .fetch(request)
        .await
        .map_err(|e| eyre!("Install fetch failed for {}: {}", request.url, e))?;

      if !response.is_success() {
        return Err(eyre!(
          "Install fetch for {} returned status {}",
          request.url,
          response.status()
        ));
      }

      response
        .snapshot()
        .ok_or_else(|| eyre!("Install response for {} was already consumed", request.url))
    });

    let snapshots = try_join_all(fetches).await?;

    for (request, snapshot) in requests.iter().zip(&snapshots) {
      self.store(&self.names.shell, request, snapshot)?;
    }

    // Assets partition exists from the start but is filled lazily.
    self.backend.open_partition(&self.names.assets)?;

    info!(
      "install complete: {} entries in {}",
      snapshots.len(),
      self.names.shell
    );

    Ok(())
  }

  /// Delete every partition that is not one of the three current names.
  ///
  /// Must finish before the worker starts answering fetches as controller.
  pub fn activate(&self) -> Result<()> {
    let current = self.names.current();

    for name in self.backend.partitions()? {
      if !current.contains(&name.as_str()) {
        info!("deleting stale cache partition {}", name);
        self.backend.delete_partition(&name)?;
      }
    }

    Ok(())
  }
}

impl<B: CacheBackend> Clone for CacheStore<B> {
  fn clone(&self) -> Self {
    Self {
      backend: Arc::clone(&self.backend),
      names: self.names.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::backend::MemoryBackend;
  use crate::net::testing::StubNetwork;

  fn origin() -> Url {
    Url::parse("https://shop.test").unwrap()
  }

  fn manifest() -> ShellManifest {
    ShellManifest::new(vec!["/".to_string(), "/index.html".to_string()])
  }

  fn store() -> CacheStore<MemoryBackend> {
    CacheStore::new(MemoryBackend::new(), CacheNames::for_version("v2"))
  }

  fn route_manifest(network: &StubNetwork) {
    network.route("https://shop.test/", 200, b"<html>home</html>");
    network.route("https://shop.test/index.html", 200, b"<html>index</html>");
  }

  #[tokio::test]
  async fn install_populates_the_shell_partition() {
    let store = store();
    let network = StubNetwork::new();
    route_manifest(&network);

    store.install(&manifest(), &origin(), &network).await.unwrap();

    let keys = store.keys("v2-shell").unwrap();
    assert_eq!(
      keys,
      vec![
        "GET https://shop.test/".to_string(),
        "GET https://shop.test/index.html".to_string(),
      ]
    );

    // Assets partition is opened but empty.
    assert!(store.partitions().unwrap().contains(&"v2-assets".to_string()));
    assert!(store.keys("v2-assets").unwrap().is_empty());
  }

  #[tokio::test]
  async fn install_is_idempotent() {
    let store = store();
    let network = StubNetwork::new();
    route_manifest(&network);

    store.install(&manifest(), &origin(), &network).await.unwrap();
    let first = store.keys("v2-shell").unwrap();

    store.install(&manifest(), &origin(), &network).await.unwrap();
    let second = store.keys("v2-shell").unwrap();

    assert_eq!(first, second);
  }

  #[tokio::test]
  async fn failed_install_commits_nothing() {
    let store = store();
    let network = StubNetwork::new();
    network.route("https://shop.test/", 200, b"<html>home</html>");
    network.route("https://shop.test/index.html", 500, b"boom");

    let result = store.install(&manifest(), &origin(), &network).await;
    assert!(result.is_err());

    // No partial shell partition: even the successful fetch was not written.
    assert!(store.keys("v2-shell").unwrap().is_empty());
  }

  #[tokio::test]
  async fn install_fails_when_the_network_is_down() {
    let store = store();
    let network = StubNetwork::new();
    network.set_offline(true);

    assert!(store.install(&manifest(), &origin(), &network).await.is_err());
    assert!(store.keys("v2-shell").unwrap().is_empty());
  }

  #[tokio::test]
  async fn activate_deletes_orphaned_partitions() {
    let backend = MemoryBackend::new();
    backend.open_partition("v1-shell").unwrap();
    backend.open_partition("v1-api").unwrap();

    let store = CacheStore::new(backend, CacheNames::for_version("v2"));
    let network = StubNetwork::new();
    route_manifest(&network);
    store.install(&manifest(), &origin(), &network).await.unwrap();

    store.activate().unwrap();

    let mut remaining = store.partitions().unwrap();
    remaining.sort();
    assert_eq!(
      remaining,
      vec!["v2-assets".to_string(), "v2-shell".to_string()]
    );
  }
}
