//! Replay of the pending-write queue.

use tracing::{debug, info, warn};

use crate::queue::PendingWriteQueue;
use crate::transport::Transport;
use crate::types::{DrainSummary, PendingWrite};

/// Replay every queued write once, oldest first.
///
/// Deliveries run one at a time. The first failure bumps that entry's retry
/// counter and ends the pass, leaving it and everything after it queued in
/// order. `is_online` is consulted before each delivery so an "offline" signal
/// stops the pass without aborting a request already on the wire.
///
/// `on_success` runs once per removed entry after the pass completes. Delivery
/// errors are never returned; they only show up in `failed`.
pub async fn drain<T, O, C>(
  queue: &PendingWriteQueue,
  transport: &T,
  is_online: O,
  mut on_success: C,
) -> DrainSummary
where
  T: Transport + ?Sized,
  O: Fn() -> bool,
  C: FnMut(&PendingWrite),
{
  let snapshot = queue.list().await;
  let total = snapshot.len();
  let mut summary = DrainSummary::default();
  let mut removed = Vec::new();

  if total > 0 {
    info!("Draining {} pending write(s)", total);
  }

  for write in snapshot {
    if !is_online() {
      info!(
        "Went offline mid-drain, leaving {} write(s) queued",
        total - removed.len()
      );
      break;
    }

    match transport.deliver(&write.request).await {
      Ok(()) => {
        summary.sent += 1;
        debug!(
          "Delivered pending write {} {} {}",
          write.id, write.request.method, write.request.target
        );
        if queue.remove(write.id).await {
          removed.push(write);
        } else {
          warn!("Delivered pending write {} but could not remove it", write.id);
        }
      }
      Err(e) => {
        summary.failed += 1;
        let retries = queue.record_failure(write.id).await;
        warn!(
          "Failed to deliver pending write {} {} {} (retries: {:?}): {}",
          write.id, write.request.method, write.request.target, retries, e
        );
        break;
      }
    }
  }

  for write in &removed {
    on_success(write);
  }

  if total > 0 {
    info!(
      "Drain finished: {} sent, {} failed",
      summary.sent, summary.failed
    );
  }
  summary
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::SqliteStore;
  use crate::transport::testing::ScriptedTransport;
  use crate::types::WriteRequest;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Arc;

  async fn queue_with(targets: &[&str]) -> PendingWriteQueue {
    let queue = PendingWriteQueue::new(Arc::new(SqliteStore::open_in_memory().unwrap()));
    for target in targets {
      queue.enqueue(WriteRequest::new("POST", *target)).await;
    }
    queue
  }

  fn targets(writes: &[PendingWrite]) -> Vec<String> {
    writes.iter().map(|w| w.request.target.clone()).collect()
  }

  #[tokio::test]
  async fn test_drain_delivers_in_order() {
    let queue = queue_with(&["/a", "/b", "/c"]).await;
    let transport = ScriptedTransport::new();
    let mut seen = Vec::new();

    let summary = drain(&queue, &transport, || true, |w| seen.push(w.id)).await;

    assert_eq!(summary, DrainSummary { sent: 3, failed: 0 });
    assert_eq!(transport.delivered_targets(), vec!["/a", "/b", "/c"]);
    assert_eq!(seen.len(), 3);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(queue.count().await, 0);
  }

  #[tokio::test]
  async fn test_failure_blocks_later_entries() {
    let queue = queue_with(&["/a", "/b", "/c"]).await;
    let transport = ScriptedTransport::new();
    transport.fail_target("/a");

    let summary = drain(&queue, &transport, || true, |_| {}).await;

    assert_eq!(summary, DrainSummary { sent: 0, failed: 1 });
    assert_eq!(transport.attempts(), 1);

    let remaining = queue.list().await;
    assert_eq!(targets(&remaining), vec!["/a", "/b", "/c"]);
    assert_eq!(remaining[0].retries, 1);
    assert_eq!(remaining[1].retries, 0);
    assert_eq!(remaining[2].retries, 0);
  }

  #[tokio::test]
  async fn test_failure_mid_queue_keeps_earlier_successes() {
    let queue = queue_with(&["/a", "/b", "/c"]).await;
    let transport = ScriptedTransport::new();
    transport.fail_target("/b");
    let mut callbacks = 0;

    let summary = drain(&queue, &transport, || true, |_| callbacks += 1).await;

    assert_eq!(summary, DrainSummary { sent: 1, failed: 1 });
    assert_eq!(callbacks, 1);
    assert_eq!(targets(&queue.list().await), vec!["/b", "/c"]);

    transport.heal_target("/b");
    let summary = drain(&queue, &transport, || true, |_| {}).await;
    assert_eq!(summary, DrainSummary { sent: 2, failed: 0 });
    assert_eq!(transport.delivered_targets(), vec!["/a", "/b", "/c"]);
  }

  #[tokio::test]
  async fn test_offline_signal_stops_before_next_entry() {
    let queue = queue_with(&["/a", "/b", "/c"]).await;
    let online = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&online);
    // Connectivity drops while the first request is in flight
    let transport = ScriptedTransport::new().on_deliver(move |_| flag.store(false, Ordering::SeqCst));

    let summary = drain(&queue, &transport, || online.load(Ordering::SeqCst), |_| {}).await;

    assert_eq!(summary, DrainSummary { sent: 1, failed: 0 });
    assert_eq!(transport.delivered_targets(), vec!["/a"]);
    assert_eq!(targets(&queue.list().await), vec!["/b", "/c"]);
  }

  #[tokio::test]
  async fn test_offline_from_start_sends_nothing() {
    let queue = queue_with(&["/a"]).await;
    let transport = ScriptedTransport::new();

    let summary = drain(&queue, &transport, || false, |_| {}).await;

    assert_eq!(summary, DrainSummary::default());
    assert_eq!(transport.attempts(), 0);
    assert_eq!(queue.count().await, 1);
  }

  #[tokio::test]
  async fn test_empty_queue() {
    let queue = queue_with(&[]).await;
    let transport = ScriptedTransport::new();

    let summary = drain(&queue, &transport, || true, |_| {}).await;
    assert_eq!(summary, DrainSummary::default());
  }
}
