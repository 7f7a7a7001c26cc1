//! Durable, ordered log of writes the server has not confirmed.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::store::{self, Storage, StoreResult};
use crate::types::{PendingWrite, WriteRequest};

/// Process-wide notifications emitted by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
  /// A write was durably appended
  PendingWriteAdded { id: i64 },
}

/// FIFO queue of pending writes backed by [`Storage`].
#[derive(Clone)]
pub struct PendingWriteQueue {
  store: Arc<dyn Storage>,
  clock: Arc<dyn Clock>,
  events: broadcast::Sender<QueueEvent>,
}

impl PendingWriteQueue {
  pub fn new(store: Arc<dyn Storage>) -> Self {
    let (events, _) = broadcast::channel(64);
    Self {
      store,
      clock: Arc::new(SystemClock),
      events,
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Receive a [`QueueEvent`] for every successful enqueue from now on.
  pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
    self.events.subscribe()
  }

  /// Append a write. Returns the assigned id, or `None` if it could not be
  /// stored durably.
  pub async fn enqueue(&self, request: WriteRequest) -> Option<i64> {
    let now = self.clock.now_ms();
    let method = request.method.clone();
    let target = request.target.clone();

    match store::blocking(&self.store, move |s| s.append_write(&request, now)).await {
      StoreResult::Success(id) => {
        debug!("Queued pending write {} {} {}", id, method, target);
        // No subscribers is fine
        let _ = self.events.send(QueueEvent::PendingWriteAdded { id });
        Some(id)
      }
      StoreResult::Empty => None,
      StoreResult::Fault(e) => {
        warn!("Failed to queue pending write {} {}: {}", method, target, e);
        None
      }
    }
  }

  /// All pending writes in ascending id order. Empty on storage failure.
  pub async fn list(&self) -> Vec<PendingWrite> {
    match store::blocking(&self.store, |s| s.list_writes()).await {
      StoreResult::Success(writes) => writes,
      StoreResult::Empty => Vec::new(),
      StoreResult::Fault(e) => {
        warn!("Failed to list pending writes: {}", e);
        Vec::new()
      }
    }
  }

  /// Delete a pending write. Unknown ids are ignored. Returns whether the
  /// row is known to be gone.
  pub async fn remove(&self, id: i64) -> bool {
    match store::blocking(&self.store, move |s| s.delete_write(id)).await {
      StoreResult::Success(()) | StoreResult::Empty => true,
      StoreResult::Fault(e) => {
        warn!("Failed to remove pending write {}: {}", id, e);
        false
      }
    }
  }

  /// Bump the retry counter after a failed delivery.
  pub async fn record_failure(&self, id: i64) -> Option<u32> {
    match store::blocking(&self.store, move |s| s.increment_retries(id)).await {
      StoreResult::Success(retries) => Some(retries),
      StoreResult::Empty => None,
      StoreResult::Fault(e) => {
        warn!("Failed to record retry for pending write {}: {}", id, e);
        None
      }
    }
  }

  /// Number of pending writes; 0 on storage failure.
  pub async fn count(&self) -> u64 {
    match store::blocking(&self.store, |s| s.count_writes()).await {
      StoreResult::Success(n) => n,
      StoreResult::Empty => 0,
      StoreResult::Fault(e) => {
        warn!("Failed to count pending writes: {}", e);
        0
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::store::{FaultyStore, SqliteStore};

  fn queue() -> PendingWriteQueue {
    PendingWriteQueue::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
  }

  #[tokio::test]
  async fn test_enqueue_sets_defaults() {
    let clock = Arc::new(ManualClock::new(12_345));
    let queue = queue().with_clock(clock);

    let id = queue
      .enqueue(WriteRequest::new("POST", "/orders").with_payload(r#"{"id":1}"#))
      .await
      .unwrap();

    let writes = queue.list().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].id, id);
    assert_eq!(writes[0].created_at, 12_345);
    assert_eq!(writes[0].retries, 0);
  }

  #[tokio::test]
  async fn test_enqueue_notifies_subscribers() {
    let queue = queue();
    let mut events = queue.subscribe();

    let id = queue.enqueue(WriteRequest::new("POST", "/orders")).await.unwrap();
    assert_eq!(
      events.recv().await.unwrap(),
      QueueEvent::PendingWriteAdded { id }
    );
  }

  #[tokio::test]
  async fn test_list_is_fifo_and_restartable() {
    let queue = queue();
    for target in ["/a", "/b", "/c"] {
      queue.enqueue(WriteRequest::new("POST", target)).await;
    }

    let first: Vec<_> = queue.list().await.into_iter().map(|w| w.request.target).collect();
    let second: Vec<_> = queue.list().await.into_iter().map(|w| w.request.target).collect();
    assert_eq!(first, vec!["/a", "/b", "/c"]);
    assert_eq!(first, second);
  }

  #[tokio::test]
  async fn test_remove_is_idempotent() {
    let queue = queue();
    let a = queue.enqueue(WriteRequest::new("POST", "/a")).await.unwrap();
    queue.enqueue(WriteRequest::new("POST", "/b")).await;

    assert!(queue.remove(a).await);
    assert_eq!(queue.count().await, 1);

    assert!(queue.remove(a).await);
    assert_eq!(queue.count().await, 1);
  }

  #[tokio::test]
  async fn test_record_failure_increments_retries() {
    let queue = queue();
    let id = queue.enqueue(WriteRequest::new("POST", "/a")).await.unwrap();

    assert_eq!(queue.record_failure(id).await, Some(1));
    assert_eq!(queue.list().await[0].retries, 1);
  }

  #[tokio::test]
  async fn test_storage_fault_degrades() {
    let queue = PendingWriteQueue::new(Arc::new(FaultyStore));
    let mut events = queue.subscribe();

    assert_eq!(queue.enqueue(WriteRequest::new("POST", "/a")).await, None);
    assert!(queue.list().await.is_empty());
    assert_eq!(queue.count().await, 0);
    assert!(!queue.remove(1).await);
    assert!(events.try_recv().is_err());
  }
}
