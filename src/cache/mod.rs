//! Response cache over successful read results.
//!
//! This module provides a keyed cache that:
//! - Derives keys from method + absolute URL, so relative and absolute forms agree
//! - Decides staleness at read time; rows are never evicted for age
//! - Absorbs every storage fault and reports it as a miss

mod layer;
mod result;

use std::sync::Arc;

use chrono::Duration;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::store::{self, Storage, StoreResult};
use crate::types::CacheEntry;

pub use result::{CacheSource, Cached};

/// Freshness window used when the caller does not pass one.
pub const DEFAULT_MAX_AGE_MS: i64 = 5 * 60 * 1000;

/// Keyed cache of JSON read results.
#[derive(Clone)]
pub struct ResponseCache {
  store: Arc<dyn Storage>,
  clock: Arc<dyn Clock>,
  /// Origin that relative URLs are resolved against
  origin: Option<Url>,
  default_max_age_ms: i64,
}

impl ResponseCache {
  pub fn new(store: Arc<dyn Storage>, origin: Option<Url>) -> Self {
    Self {
      store,
      clock: Arc::new(SystemClock),
      origin,
      default_max_age_ms: DEFAULT_MAX_AGE_MS,
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Set the freshness window applied when `get` is called without one.
  pub fn with_default_max_age(mut self, max_age: Duration) -> Self {
    self.default_max_age_ms = max_age.num_milliseconds();
    self
  }

  /// Cache key for a request: upper-cased method and absolute URL.
  pub fn key_for(&self, method: &str, url: &str) -> String {
    format!("{}:{}", method.to_uppercase(), self.absolute_url(url))
  }

  pub fn cache_key_for_get(&self, url: &str) -> String {
    self.key_for("GET", url)
  }

  /// Resolve a possibly-relative URL against the configured origin.
  pub fn absolute_url(&self, url: &str) -> String {
    if let Ok(parsed) = Url::parse(url) {
      return parsed.to_string();
    }

    match &self.origin {
      Some(origin) => match origin.join(url) {
        Ok(joined) => joined.to_string(),
        Err(_) => format!("{}{}", origin.as_str().trim_end_matches('/'), url),
      },
      None => url.to_string(),
    }
  }

  /// Cached value for `key`, or `None` if missing or older than the window.
  ///
  /// `None` for `max_age_ms` applies the default window; zero or negative
  /// disables the age check entirely.
  pub async fn get(&self, key: &str, max_age_ms: Option<i64>) -> Option<Value> {
    self.get_entry(key, max_age_ms).await.map(|entry| entry.value)
  }

  /// Like [`get`](Self::get) but keeps the row metadata.
  pub async fn get_entry(&self, key: &str, max_age_ms: Option<i64>) -> Option<CacheEntry> {
    let max_age = max_age_ms.unwrap_or(self.default_max_age_ms);
    let owned = key.to_string();

    let entry = match store::blocking(&self.store, move |s| s.get_cached(&owned)).await {
      StoreResult::Success(entry) => entry,
      StoreResult::Empty => return None,
      StoreResult::Fault(e) => {
        warn!("Failed to read cached response {}: {}", key, e);
        return None;
      }
    };

    if entry.value.is_null() {
      return None;
    }

    let age = self.clock.now_ms() - entry.updated_at;
    if max_age > 0 && age > max_age {
      debug!("Cached response {} expired ({}ms > {}ms)", key, age, max_age);
      return None;
    }

    Some(entry)
  }

  /// Upsert `value` under `key` stamped with the current time.
  pub async fn put(&self, key: &str, value: &Value) {
    let owned = key.to_string();
    let value = value.clone();
    let now = self.clock.now_ms();

    match store::blocking(&self.store, move |s| s.put_cached(&owned, &value, now)).await {
      StoreResult::Success(_) | StoreResult::Empty => {}
      StoreResult::Fault(e) => warn!("Failed to cache response {}: {}", key, e),
    }
  }

  /// Drop the row for `key`. Only consumers call this; the cache never evicts
  /// on its own.
  pub async fn invalidate(&self, key: &str) {
    let owned = key.to_string();

    match store::blocking(&self.store, move |s| s.delete_cached(&owned)).await {
      StoreResult::Success(()) => debug!("Invalidated cached response {}", key),
      StoreResult::Empty => {}
      StoreResult::Fault(e) => warn!("Failed to invalidate cached response {}: {}", key, e),
    }
  }
}
