//! Request classification: which caching strategy handles a request.

use crate::http::Request;

/// The three request-handling strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Cache-first: precached shell assets.
  AppShell,
  /// Network-first with stale fallback: API data.
  Api,
  /// Stale-while-revalidate: everything else.
  Generic,
}

/// The static list of paths precached into the shell partition at install.
///
/// Membership is exact path equality: no prefix or wildcard matching, and no
/// query-string normalization, so entries must be enumerated exactly
/// (trailing slashes included).
#[derive(Debug, Clone)]
pub struct ShellManifest {
  entries: Vec<String>,
}

impl ShellManifest {
  pub fn new(entries: Vec<String>) -> Self {
    Self { entries }
  }

  pub fn contains(&self, path: &str) -> bool {
    self.entries.iter().any(|entry| entry == path)
  }

  pub fn entries(&self) -> &[String] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }
}

/// Pick the strategy for a request. First match wins:
/// API prefix, then exact manifest match, then generic.
pub fn classify(request: &Request, api_prefix: &str, manifest: &ShellManifest) -> Strategy {
  let path = request.path();

  if path.starts_with(api_prefix) {
    Strategy::Api
  } else if manifest.contains(path) {
    Strategy::AppShell
  } else {
    Strategy::Generic
  }
}
