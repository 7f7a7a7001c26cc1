//! Read results tagged with where they came from.

use chrono::{DateTime, TimeZone, Utc};

/// Result from a read-through lookup, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct Cached<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> Cached<T> {
  /// Fresh data from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Cached data still inside its freshness window.
  pub fn from_cache(data: T, updated_at_ms: i64) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Utc.timestamp_millis_opt(updated_at_ms).single(),
    }
  }

  /// Cached data served regardless of age because the network is unavailable.
  pub fn offline(data: T, updated_at_ms: i64) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Utc.timestamp_millis_opt(updated_at_ms).single(),
    }
  }

  pub fn is_stale(&self) -> bool {
    self.source == CacheSource::Offline
  }
}

/// Indicates where read data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Network unavailable, serving cached data of any age
  Offline,
}
