//! Read-through fetching on top of the response cache.

use color_eyre::Result;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, warn};

use super::result::Cached;
use super::ResponseCache;

impl ResponseCache {
  /// Fetch with a cache-first strategy.
  ///
  /// 1. Check cache - if fresh, return immediately
  /// 2. If stale/missing, fetch from network and store the result
  /// 3. On network failure, return any cached value regardless of age
  /// 4. With nothing cached, the network error is returned
  pub async fn fetch<F, Fut>(
    &self,
    key: &str,
    max_age_ms: Option<i64>,
    fetcher: F,
  ) -> Result<Cached<Value>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value>>,
  {
    if let Some(entry) = self.get_entry(key, max_age_ms).await {
      return Ok(Cached::from_cache(entry.value, entry.updated_at));
    }

    match fetcher().await {
      Ok(data) => {
        self.put(key, &data).await;
        Ok(Cached::from_network(data))
      }
      Err(e) => match self.fetch_offline(key).await {
        Some(cached) => {
          warn!("Serving stale cache for {} after fetch failed: {}", key, e);
          Ok(cached)
        }
        None => Err(e),
      },
    }
  }

  /// Serve whatever is cached for `key`, ignoring age.
  ///
  /// Used when the caller already knows the network is unreachable.
  pub async fn fetch_offline(&self, key: &str) -> Option<Cached<Value>> {
    let entry = self.get_entry(key, Some(0)).await?;
    debug!("Offline read of {} (updated_at {})", key, entry.updated_at);
    Some(Cached::offline(entry.value, entry.updated_at))
  }
}
