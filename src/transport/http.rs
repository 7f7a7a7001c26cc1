use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::Transport;
use crate::types::WriteRequest;

/// HTTP transport backed by reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: Client,
  /// Base for relative targets
  origin: Option<Url>,
  /// Bearer token attached when a request carries no Authorization header
  token: Option<String>,
}

impl HttpTransport {
  pub fn new(origin: Option<Url>, token: Option<String>) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin,
      token,
    })
  }

  /// Resolve `target` against the origin unless it is already absolute.
  fn resolve(&self, target: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(target) {
      return Ok(url);
    }

    let origin = self
      .origin
      .as_ref()
      .ok_or_else(|| eyre!("Cannot resolve {} without server.origin", target))?;

    origin
      .join(target)
      .map_err(|e| eyre!("Invalid target {}: {}", target, e))
  }

  async fn send_write(&self, request: &WriteRequest) -> Result<()> {
    let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;
    let url = self.resolve(&request.target)?;

    let mut builder = self.client.request(method, url);
    let mut has_auth = false;
    let mut has_content_type = false;

    if let Some(headers) = &request.headers {
      for (name, value) in headers {
        has_auth |= name.eq_ignore_ascii_case(AUTHORIZATION.as_str());
        has_content_type |= name.eq_ignore_ascii_case(CONTENT_TYPE.as_str());
        builder = builder.header(name, value);
      }
    }

    if !has_auth {
      if let Some(token) = &self.token {
        builder = builder.bearer_auth(token);
      }
    }

    if let Some(payload) = &request.payload {
      if !has_content_type {
        builder = builder.header(CONTENT_TYPE, "application/json");
      }
      builder = builder.body(payload.clone());
    }

    builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to send {} {}: {}", request.method, request.target, e))?
      .error_for_status()
      .map_err(|e| eyre!("Server rejected {} {}: {}", request.method, request.target, e))?;

    Ok(())
  }

  async fn get_json(&self, url: &str) -> Result<Value> {
    let mut builder = self.client.get(self.resolve(url)?);
    if let Some(token) = &self.token {
      builder = builder.bearer_auth(token);
    }

    builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?
      .error_for_status()
      .map_err(|e| eyre!("Server rejected GET {}: {}", url, e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse response from {}: {}", url, e))
  }
}

impl Transport for HttpTransport {
  fn deliver<'a>(&'a self, request: &'a WriteRequest) -> BoxFuture<'a, Result<()>> {
    self.send_write(request).boxed()
  }

  fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Value>> {
    self.get_json(url).boxed()
  }
}
