//! Request and response types for the interception pipeline.
//!
//! Responses carry a single-shot body: it can be read at most once, and any
//! component that needs two consumers (return one copy, cache the other) must
//! duplicate the response before the first read.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// HTTP methods the worker intercepts.
#[allow(dead_code)] // the CLI driver only issues GETs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Delete,
  Patch,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Head => "HEAD",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Delete => "DELETE",
      Self::Patch => "PATCH",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// An intercepted outgoing request.
///
/// The body is deliberately absent: cache identity is method + URL only.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self { method, url }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  /// URL path, used by the classifier. Query strings are not part of the path.
  pub fn path(&self) -> &str {
    self.url.path()
  }

  /// Identity under which this request is cached: method + full URL.
  pub fn cache_key(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

#[derive(Debug, Clone)]
enum BodyState {
  Buffered(Vec<u8>),
  Consumed,
}

/// A response heading back to the application.
///
/// The body can be read once via [`Response::read_body`]; after that the
/// response is spent and [`Response::try_clone`] returns `None`.
#[derive(Debug)]
pub struct Response {
  status: u16,
  headers: BTreeMap<String, String>,
  body: BodyState,
}

impl Response {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: BodyState::Buffered(Vec::new()),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_string(), value.to_string());
    self
  }

  pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
    self.headers = headers;
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = BodyState::Buffered(body.into());
    self
  }

  pub fn status(&self) -> u16 {
    self.status
  }

  /// True for 2xx statuses.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  #[allow(dead_code)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name).map(String::as_str)
  }

  /// Read the body, consuming it. A second read is an error.
  pub fn read_body(&mut self) -> Result<Vec<u8>> {
    match std::mem::replace(&mut self.body, BodyState::Consumed) {
      BodyState::Buffered(bytes) => Ok(bytes),
      BodyState::Consumed => Err(eyre!("response body already consumed")),
    }
  }

  /// Duplicate this response. Returns `None` once the body has been consumed,
  /// so callers must clone before the first read.
  #[allow(dead_code)]
  pub fn try_clone(&self) -> Option<Response> {
    match &self.body {
      BodyState::Buffered(bytes) => Some(Response {
        status: self.status,
        headers: self.headers.clone(),
        body: BodyState::Buffered(bytes.clone()),
      }),
      BodyState::Consumed => None,
    }
  }

  /// Snapshot this response for storage in a partition. Returns `None` once
  /// the body has been consumed.
  pub fn snapshot(&self) -> Option<StoredResponse> {
    match &self.body {
      BodyState::Buffered(bytes) => Some(StoredResponse {
        status: self.status,
        headers: self.headers.clone(),
        body: bytes.clone(),
        stored_at: Utc::now(),
      }),
      BodyState::Consumed => None,
    }
  }
}

/// A response snapshot as held in a cache partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl StoredResponse {
  /// Rehydrate the snapshot into a servable response with a fresh body.
  pub fn into_response(self) -> Response {
    Response {
      status: self.status,
      headers: self.headers,
      body: BodyState::Buffered(self.body),
    }
  }
}
