//! Network seam used for replaying writes and read-through fetches.

mod http;

use color_eyre::Result;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::types::WriteRequest;

pub use http::HttpTransport;

/// Something that can put requests on the wire.
///
/// Implementations report any non-success as an error; callers decide whether
/// that means "queue it" or "retry later".
pub trait Transport: Send + Sync {
  /// Send a mutating request.
  fn deliver<'a>(&'a self, request: &'a WriteRequest) -> BoxFuture<'a, Result<()>>;

  /// Issue a GET and parse the JSON body.
  fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Value>>;
}
