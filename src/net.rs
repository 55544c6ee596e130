//! Network seam for the worker.
//!
//! Strategies never talk to `reqwest` directly; they go through the
//! [`Network`] trait so tests can substitute stubs and the CLI can swap in a
//! dead network with `--offline`.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;

use crate::http::{Method, Request, Response};

/// Performs a real (or simulated) network fetch.
///
/// `Err` means transport failure only (DNS, connection refused, timeout).
/// HTTP error statuses are returned as `Ok` responses; strategies decide what
/// to do with them.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Live network over reqwest.
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Delete => reqwest::Method::DELETE,
    Method::Patch => reqwest::Method::PATCH,
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let resp = self
      .client
      .request(to_reqwest_method(request.method), request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Fetch failed for {}: {}", request.url, e))?;

    let status = resp.status().as_u16();

    let mut headers = BTreeMap::new();
    for (name, value) in resp.headers() {
      if let Ok(v) = value.to_str() {
        headers.insert(name.as_str().to_string(), v.to_string());
      }
    }

    let body = resp
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body for {}: {}", request.url, e))?;

    Ok(
      Response::new(status)
        .with_headers(headers)
        .with_body(body.to_vec()),
    )
  }
}

/// Network that refuses every fetch. Backs the CLI `--offline` flag.
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    Err(eyre!("offline: refusing fetch for {}", request.url))
  }
}
