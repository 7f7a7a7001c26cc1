//! Offline-aware client that wraps a [`Transport`] with the response cache and
//! pending-write queue.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{Cached, ResponseCache};
use crate::queue::PendingWriteQueue;
use crate::sync::MonitorHandle;
use crate::transport::Transport;
use crate::types::{ConnectivityState, WriteRequest};

/// What happened to a write handed to [`OfflineClient::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
  /// The server accepted it immediately
  Delivered,
  /// Stored for replay under this id
  Queued(i64),
  /// Could neither be sent nor stored
  Dropped,
}

/// Client the UI reads and writes through.
///
/// Reads go through the cache (offline: any cached value; online: cache-first
/// with stale fallback). Writes are sent immediately when online with nothing
/// queued ahead of them, and queued otherwise or when the send fails.
#[derive(Clone)]
pub struct OfflineClient {
  cache: ResponseCache,
  queue: PendingWriteQueue,
  transport: Arc<dyn Transport>,
  state: watch::Receiver<ConnectivityState>,
}

impl OfflineClient {
  pub fn new(
    cache: ResponseCache,
    queue: PendingWriteQueue,
    transport: Arc<dyn Transport>,
    monitor: &MonitorHandle,
  ) -> Self {
    Self {
      cache,
      queue,
      transport,
      state: monitor.subscribe(),
    }
  }

  pub fn cache(&self) -> &ResponseCache {
    &self.cache
  }

  pub fn queue(&self) -> &PendingWriteQueue {
    &self.queue
  }

  fn is_online(&self) -> bool {
    self.state.borrow().is_online
  }

  /// GET `url` as JSON through the cache.
  pub async fn get(&self, url: &str) -> Result<Cached<Value>> {
    let key = self.cache.cache_key_for_get(url);

    if !self.is_online() {
      return self
        .cache
        .fetch_offline(&key)
        .await
        .ok_or_else(|| eyre!("Offline and nothing cached for {}", url));
    }

    let transport = Arc::clone(&self.transport);
    let url = url.to_string();
    self
      .cache
      .fetch(&key, None, || async move { transport.fetch(&url).await })
      .await
  }

  /// Send a write now if possible, otherwise queue it for replay.
  ///
  /// A write never overtakes older ones: while anything is queued or a drain
  /// is running it goes to the back of the queue even when online.
  pub async fn send(&self, request: WriteRequest) -> SendOutcome {
    let state = *self.state.borrow();
    let behind_queue = state.is_syncing || state.pending_count > 0 || self.queue.count().await > 0;
    let attempt_now = state.is_online && !behind_queue;

    if attempt_now {
      match self.transport.deliver(&request).await {
        Ok(()) => return SendOutcome::Delivered,
        Err(e) => warn!(
          "Immediate {} {} failed, queueing: {}",
          request.method, request.target, e
        ),
      }
    } else if behind_queue {
      debug!(
        "Queueing {} {} behind earlier pending writes",
        request.method, request.target
      );
    }

    if let Some(id) = self.queue.enqueue(request.clone()).await {
      return SendOutcome::Queued(id);
    }

    // Durable storage is unavailable; one unqueued attempt is all we can do
    if !attempt_now && !behind_queue && self.transport.deliver(&request).await.is_ok() {
      info!(
        "Delivered {} {} without queueing",
        request.method, request.target
      );
      return SendOutcome::Delivered;
    }

    warn!(
      "Dropped {} {}: could not send or queue it",
      request.method, request.target
    );
    SendOutcome::Dropped
  }
}
