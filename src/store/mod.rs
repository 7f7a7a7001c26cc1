//! Durable storage for the response cache and the pending-write log.
//!
//! Two logically separate tables live behind the [`Storage`] trait:
//! - `api_cache`: one row per cache key, upserted on every successful read
//! - `pending_writes`: append/delete log with an auto-incrementing id
//!
//! Storage never raises on a missing row. Every operation reports an explicit
//! [`StoreResult`] so callers can branch on success, absence, or fault instead
//! of unwinding.

mod sqlite;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::types::{CacheEntry, PendingWrite, WriteRequest};

pub use sqlite::SqliteStore;

/// Why a storage operation could not complete.
#[derive(Debug, Error)]
pub enum StoreFault {
  #[error("storage unavailable: {0}")]
  Unavailable(String),
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("storage lock poisoned")]
  LockPoisoned,
}

/// Outcome of a storage operation.
#[derive(Debug)]
#[must_use]
pub enum StoreResult<T> {
  /// The operation completed and produced a value
  Success(T),
  /// Nothing matched (missing key, unknown id, or nothing was stored)
  Empty,
  /// The store could not be reached or rejected the operation
  Fault(StoreFault),
}

impl<T> StoreResult<T> {
  /// Collapse absence and faults into `None`.
  pub fn ok(self) -> Option<T> {
    match self {
      StoreResult::Success(v) => Some(v),
      StoreResult::Empty | StoreResult::Fault(_) => None,
    }
  }

  pub fn is_fault(&self) -> bool {
    matches!(self, StoreResult::Fault(_))
  }
}

impl<T> From<Result<Option<T>, StoreFault>> for StoreResult<T> {
  fn from(result: Result<Option<T>, StoreFault>) -> Self {
    match result {
      Ok(Some(v)) => StoreResult::Success(v),
      Ok(None) => StoreResult::Empty,
      Err(e) => StoreResult::Fault(e),
    }
  }
}

/// Trait for storage backends.
///
/// Mutations are atomic per row, so concurrent callers need no extra locking.
pub trait Storage: Send + Sync {
  /// Get the cache row for a key.
  fn get_cached(&self, key: &str) -> StoreResult<CacheEntry>;

  /// Upsert a cache row. Returns the `updated_at` actually stored, which is
  /// never earlier than the one it replaces.
  fn put_cached(&self, key: &str, value: &Value, now_ms: i64) -> StoreResult<i64>;

  /// Delete a cache row. `Empty` if there was none.
  fn delete_cached(&self, key: &str) -> StoreResult<()>;

  /// Append a pending write and return its assigned id.
  fn append_write(&self, request: &WriteRequest, created_at: i64) -> StoreResult<i64>;

  /// All pending writes in ascending id order.
  fn list_writes(&self) -> StoreResult<Vec<PendingWrite>>;

  /// Delete a pending write. `Empty` if the id is unknown.
  fn delete_write(&self, id: i64) -> StoreResult<()>;

  /// Increment the retry counter and return its new value.
  fn increment_retries(&self, id: i64) -> StoreResult<u32>;

  fn count_writes(&self) -> StoreResult<u64>;
}

/// Run a storage operation on the blocking pool so database I/O never stalls
/// the async runtime.
pub async fn blocking<T, F>(store: &Arc<dyn Storage>, op: F) -> StoreResult<T>
where
  T: Send + 'static,
  F: FnOnce(&dyn Storage) -> StoreResult<T> + Send + 'static,
{
  let store = Arc::clone(store);
  match tokio::task::spawn_blocking(move || op(store.as_ref())).await {
    Ok(result) => result,
    Err(e) => StoreResult::Fault(StoreFault::Unavailable(format!(
      "storage task failed: {}",
      e
    ))),
  }
}

/// Storage that persists nothing.
/// Used when the durable store cannot be opened: reads always miss, cache
/// writes are discarded and appends fault so writers fall back to sending
/// immediately.
pub struct NoopStore;

impl Storage for NoopStore {
  fn get_cached(&self, _key: &str) -> StoreResult<CacheEntry> {
    StoreResult::Empty
  }

  fn put_cached(&self, _key: &str, _value: &Value, _now_ms: i64) -> StoreResult<i64> {
    StoreResult::Empty
  }

  fn delete_cached(&self, _key: &str) -> StoreResult<()> {
    StoreResult::Empty
  }

  fn append_write(&self, _request: &WriteRequest, _created_at: i64) -> StoreResult<i64> {
    StoreResult::Fault(StoreFault::Unavailable(
      "durable storage is disabled".to_string(),
    ))
  }

  fn list_writes(&self) -> StoreResult<Vec<PendingWrite>> {
    StoreResult::Success(Vec::new())
  }

  fn delete_write(&self, _id: i64) -> StoreResult<()> {
    StoreResult::Empty
  }

  fn increment_retries(&self, _id: i64) -> StoreResult<u32> {
    StoreResult::Empty
  }

  fn count_writes(&self) -> StoreResult<u64> {
    StoreResult::Success(0)
  }
}

/// Storage whose every operation faults, for exercising degraded paths.
#[cfg(test)]
pub(crate) struct FaultyStore;

#[cfg(test)]
impl FaultyStore {
  fn fault<T>() -> StoreResult<T> {
    StoreResult::Fault(StoreFault::Unavailable("quota exceeded".to_string()))
  }
}

#[cfg(test)]
impl Storage for FaultyStore {
  fn get_cached(&self, _key: &str) -> StoreResult<CacheEntry> {
    Self::fault()
  }

  fn put_cached(&self, _key: &str, _value: &Value, _now_ms: i64) -> StoreResult<i64> {
    Self::fault()
  }

  fn delete_cached(&self, _key: &str) -> StoreResult<()> {
    Self::fault()
  }

  fn append_write(&self, _request: &WriteRequest, _created_at: i64) -> StoreResult<i64> {
    Self::fault()
  }

  fn list_writes(&self) -> StoreResult<Vec<PendingWrite>> {
    Self::fault()
  }

  fn delete_write(&self, _id: i64) -> StoreResult<()> {
    Self::fault()
  }

  fn increment_retries(&self, _id: i64) -> StoreResult<u32> {
    Self::fault()
  }

  fn count_writes(&self) -> StoreResult<u64> {
    Self::fault()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_store_result_from_result() {
    let hit: StoreResult<u8> = Ok(Some(1)).into();
    assert!(matches!(hit, StoreResult::Success(1)));

    let miss: StoreResult<u8> = Ok(None).into();
    assert!(matches!(miss, StoreResult::Empty));

    let fault: StoreResult<u8> = Err(StoreFault::LockPoisoned).into();
    assert!(fault.is_fault());
    assert_eq!(fault.ok(), None);
  }

  #[test]
  fn test_noop_store_refuses_appends() {
    let store = NoopStore;
    assert!(store
      .append_write(&WriteRequest::new("POST", "/orders"), 0)
      .is_fault());
    assert!(matches!(store.count_writes(), StoreResult::Success(0)));
    assert!(matches!(store.get_cached("GET:x"), StoreResult::Empty));
  }
}
