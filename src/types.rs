use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cached read result
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub key: String,
  pub value: Value,
  /// Milliseconds since the Unix epoch
  pub updated_at: i64,
}

impl CacheEntry {
  pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
    millis_to_utc(self.updated_at)
  }
}

/// A mutating request as the caller issued it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
  pub method: String,
  /// Absolute URL or a path relative to the configured origin
  pub target: String,
  pub payload: Option<String>,
  pub headers: Option<BTreeMap<String, String>>,
}

impl WriteRequest {
  pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
    Self {
      method: method.into(),
      target: target.into(),
      payload: None,
      headers: None,
    }
  }

  pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
    self.payload = Some(payload.into());
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self
      .headers
      .get_or_insert_with(BTreeMap::new)
      .insert(name.into(), value.into());
    self
  }
}

/// A queued write that the server has not confirmed yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
  /// Store-assigned, strictly increasing in insertion order
  pub id: i64,
  pub request: WriteRequest,
  /// Milliseconds since the Unix epoch
  pub created_at: i64,
  pub retries: u32,
}

impl PendingWrite {
  pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
    millis_to_utc(self.created_at)
  }
}

/// Process-wide connectivity view shared with the UI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectivityState {
  pub is_online: bool,
  pub is_syncing: bool,
  pub pending_count: u64,
}

impl ConnectivityState {
  /// Text for the non-blocking status indicator, or `None` when there is
  /// nothing to show.
  pub fn status_line(&self) -> Option<String> {
    if !self.is_online {
      return Some("You're offline. Changes will sync when you reconnect.".to_string());
    }
    if self.is_syncing {
      return Some("Syncing...".to_string());
    }
    if self.pending_count > 0 {
      return Some(format!("{} change(s) waiting to sync.", self.pending_count));
    }
    None
  }
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
  pub sent: u32,
  pub failed: u32,
}

impl DrainSummary {
  /// Whether downstream read caches should be invalidated.
  pub fn should_invalidate(&self) -> bool {
    self.sent > 0
  }
}

fn millis_to_utc(millis: i64) -> Option<DateTime<Utc>> {
  Utc.timestamp_millis_opt(millis).single()
}
