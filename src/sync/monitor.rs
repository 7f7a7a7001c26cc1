//! Connectivity state machine and drain scheduling.
//!
//! The monitor owns the process-wide [`ConnectivityState`]. Everything talks to
//! it through messages on a channel: reachability changes from the platform
//! probe, manual sync/recount requests from the UI, and enqueue notifications
//! from the queue. Drains run on their own task so that an "offline" message
//! arriving mid-drain is still seen before the next delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use super::drain::drain;
use crate::queue::{PendingWriteQueue, QueueEvent};
use crate::transport::Transport;
use crate::types::{ConnectivityState, DrainSummary};

/// Platform reachability signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
  Reachable,
  Unreachable,
}

/// Messages handled by the monitor loop
#[derive(Debug)]
enum Signal {
  Reachability(Reachability),
  RefreshPendingCount,
  SyncRequested,
  Shutdown,
}

/// Notifications for consumers that react to reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
  /// A drain pass finished. Read caches should be invalidated when
  /// `sent > 0`.
  Reconciled(DrainSummary),
}

/// Cloneable handle to a running monitor.
#[derive(Clone)]
pub struct MonitorHandle {
  signals: mpsc::UnboundedSender<Signal>,
  state: watch::Receiver<ConnectivityState>,
  events: broadcast::Sender<SyncEvent>,
}

impl MonitorHandle {
  /// Current connectivity state.
  pub fn state(&self) -> ConnectivityState {
    *self.state.borrow()
  }

  /// Watch connectivity state changes.
  pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
    self.state.clone()
  }

  /// Receive a [`SyncEvent`] after every drain from now on.
  pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
    self.events.subscribe()
  }

  /// Feed a platform reachability change into the monitor.
  pub fn reachability_changed(&self, reachability: Reachability) {
    self.send(Signal::Reachability(reachability));
  }

  /// Force a recount of the pending queue.
  pub fn refresh_pending_count(&self) {
    self.send(Signal::RefreshPendingCount);
  }

  /// Ask for a drain now. Ignored while offline or while a drain is running.
  pub fn sync_now(&self) {
    self.send(Signal::SyncRequested);
  }

  /// Stop the monitor loop. A drain already in flight is not cancelled.
  pub fn teardown(&self) {
    self.send(Signal::Shutdown);
  }

  pub fn is_closed(&self) -> bool {
    self.signals.is_closed()
  }

  fn send(&self, signal: Signal) {
    if self.signals.send(signal).is_err() {
      debug!("Connectivity monitor is gone, dropping signal");
    }
  }
}

/// Owner of [`ConnectivityState`].
pub struct ConnectivityMonitor {
  queue: PendingWriteQueue,
  transport: Arc<dyn Transport>,
  state: Arc<watch::Sender<ConnectivityState>>,
  /// Read by the running drain before each delivery
  online: Arc<AtomicBool>,
  events: broadcast::Sender<SyncEvent>,
}

impl ConnectivityMonitor {
  /// Start the monitor with the platform's current reachability.
  ///
  /// Returns a handle for consumers and the loop's task, which ends after
  /// [`MonitorHandle::teardown`] or once every handle is dropped.
  pub fn init(
    initially_online: bool,
    queue: PendingWriteQueue,
    transport: Arc<dyn Transport>,
  ) -> (MonitorHandle, JoinHandle<()>) {
    let initial = ConnectivityState {
      is_online: initially_online,
      is_syncing: false,
      pending_count: 0,
    };
    let (state_tx, state_rx) = watch::channel(initial);
    let (signals_tx, signals_rx) = mpsc::unbounded_channel();
    let (events_tx, _) = broadcast::channel(16);

    let monitor = Self {
      queue,
      transport,
      state: Arc::new(state_tx),
      online: Arc::new(AtomicBool::new(initially_online)),
      events: events_tx.clone(),
    };
    // Subscribe before spawning so no enqueue after init is missed
    let queue_events = monitor.queue.subscribe();
    let task = tokio::spawn(monitor.run(signals_rx, queue_events));

    let handle = MonitorHandle {
      signals: signals_tx,
      state: state_rx,
      events: events_tx,
    };
    (handle, task)
  }

  async fn run(
    self,
    mut signals: mpsc::UnboundedReceiver<Signal>,
    mut queue_events: broadcast::Receiver<QueueEvent>,
  ) {
    let mut drain_task: Option<JoinHandle<DrainSummary>> = None;

    info!(
      "Connectivity monitor started ({})",
      if self.online.load(Ordering::SeqCst) { "online" } else { "offline" }
    );
    self.refresh_pending_count().await;

    loop {
      tokio::select! {
        signal = signals.recv() => {
          let Some(signal) = signal else { break };
          match signal {
            Signal::Reachability(Reachability::Reachable) => {
              self.set_online(true);
              self.start_drain(&mut drain_task);
            }
            Signal::Reachability(Reachability::Unreachable) => self.set_online(false),
            Signal::SyncRequested => {
              if self.online.load(Ordering::SeqCst) {
                self.start_drain(&mut drain_task);
              } else {
                debug!("Ignoring sync request while offline");
              }
            }
            Signal::RefreshPendingCount => self.refresh_pending_count().await,
            Signal::Shutdown => break,
          }
        }
        event = queue_events.recv() => match event {
          Ok(QueueEvent::PendingWriteAdded { .. }) | Err(broadcast::error::RecvError::Lagged(_)) => {
            self.refresh_pending_count().await;
          }
          // The monitor holds a queue handle, so the sender outlives this loop
          Err(broadcast::error::RecvError::Closed) => {}
        },
        finished = wait_for(&mut drain_task), if drain_task.is_some() => {
          drain_task = None;
          self.finish_drain(finished).await;
        }
      }
    }

    if drain_task.is_some() {
      debug!("Connectivity monitor stopping with a drain still in flight");
    }
    info!("Connectivity monitor stopped");
  }

  fn set_online(&self, online: bool) {
    let was_online = self.online.swap(online, Ordering::SeqCst);
    if was_online != online {
      info!("Connectivity changed: {}", if online { "online" } else { "offline" });
    }
    self.state.send_if_modified(|state| {
      let changed = state.is_online != online;
      state.is_online = online;
      changed
    });
  }

  /// Spawn a drain unless one is already running.
  fn start_drain(&self, drain_task: &mut Option<JoinHandle<DrainSummary>>) {
    if drain_task.is_some() {
      debug!("Drain already in progress, ignoring trigger");
      return;
    }

    self.state.send_modify(|state| state.is_syncing = true);

    let queue = self.queue.clone();
    let transport = Arc::clone(&self.transport);
    let online = Arc::clone(&self.online);
    let state = Arc::clone(&self.state);

    *drain_task = Some(tokio::spawn(async move {
      drain(
        &queue,
        transport.as_ref(),
        || online.load(Ordering::SeqCst),
        |_| {
          state.send_modify(|s| s.pending_count = s.pending_count.saturating_sub(1));
        },
      )
      .await
    }));
  }

  async fn finish_drain(&self, finished: Result<DrainSummary, JoinError>) {
    let summary = finished.unwrap_or_else(|e| {
      warn!("Drain task failed: {}", e);
      DrainSummary::default()
    });

    self.refresh_pending_count().await;
    self.state.send_modify(|state| state.is_syncing = false);
    // No subscribers is fine
    let _ = self.events.send(SyncEvent::Reconciled(summary));
  }

  async fn refresh_pending_count(&self) {
    let count = self.queue.count().await;
    self.state.send_if_modified(|state| {
      let changed = state.pending_count != count;
      state.pending_count = count;
      changed
    });
  }
}

async fn wait_for<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
  match task {
    Some(handle) => handle.await,
    None => std::future::pending().await,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::SqliteStore;
  use crate::transport::testing::ScriptedTransport;
  use crate::types::WriteRequest;
  use std::time::Duration;
  use tokio::time::timeout;

  const WAIT: Duration = Duration::from_secs(5);

  fn queue() -> PendingWriteQueue {
    PendingWriteQueue::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
  }

  async fn settle(
    rx: &mut watch::Receiver<ConnectivityState>,
    f: impl FnMut(&ConnectivityState) -> bool,
  ) -> ConnectivityState {
    *timeout(WAIT, rx.wait_for(f)).await.unwrap().unwrap()
  }

  #[tokio::test]
  async fn test_initial_state_and_pending_count() {
    let queue = queue();
    queue.enqueue(WriteRequest::new("POST", "/a")).await;

    let (handle, _task) = ConnectivityMonitor::init(false, queue, Arc::new(ScriptedTransport::new()));
    let mut rx = handle.subscribe();

    let state = settle(&mut rx, |s| s.pending_count == 1).await;
    assert!(!state.is_online);
    assert!(!state.is_syncing);
  }

  #[tokio::test]
  async fn test_enqueue_updates_pending_count() {
    let queue = queue();
    let (handle, _task) =
      ConnectivityMonitor::init(false, queue.clone(), Arc::new(ScriptedTransport::new()));
    let mut rx = handle.subscribe();

    queue.enqueue(WriteRequest::new("POST", "/a")).await;
    queue.enqueue(WriteRequest::new("POST", "/b")).await;

    let state = settle(&mut rx, |s| s.pending_count == 2).await;
    assert!(!state.is_online);
    assert!(!state.is_syncing);
  }

  #[tokio::test]
  async fn test_reconnect_drains_and_reports() {
    let queue = queue();
    queue.enqueue(WriteRequest::new("POST", "/a")).await;
    let transport = Arc::new(ScriptedTransport::new());

    let (handle, _task) = ConnectivityMonitor::init(false, queue.clone(), transport.clone());
    let mut events = handle.events();
    let mut rx = handle.subscribe();
    settle(&mut rx, |s| s.pending_count == 1).await;

    handle.reachability_changed(Reachability::Reachable);

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, SyncEvent::Reconciled(DrainSummary { sent: 1, failed: 0 }));

    let state = settle(&mut rx, |s| !s.is_syncing).await;
    assert!(state.is_online);
    assert_eq!(state.pending_count, 0);
    assert_eq!(queue.count().await, 0);
  }

  #[tokio::test]
  async fn test_going_offline_leaves_queue_alone() {
    let queue = queue();
    queue.enqueue(WriteRequest::new("POST", "/a")).await;
    let transport = Arc::new(ScriptedTransport::new());

    let (handle, _task) = ConnectivityMonitor::init(true, queue.clone(), transport.clone());
    let mut rx = handle.subscribe();

    handle.reachability_changed(Reachability::Unreachable);
    let state = settle(&mut rx, |s| !s.is_online).await;

    assert_eq!(state.pending_count, 1);
    assert_eq!(transport.attempts(), 0);
  }

  #[tokio::test]
  async fn test_rapid_reconnects_run_one_drain() {
    let queue = queue();
    for target in ["/a", "/b", "/c"] {
      queue.enqueue(WriteRequest::new("POST", target)).await;
    }
    let transport = Arc::new(ScriptedTransport::new().with_delay(Duration::from_millis(50)));

    let (handle, _task) = ConnectivityMonitor::init(false, queue.clone(), transport.clone());
    let mut events = handle.events();

    handle.reachability_changed(Reachability::Reachable);
    handle.reachability_changed(Reachability::Reachable);
    handle.sync_now();

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, SyncEvent::Reconciled(DrainSummary { sent: 3, failed: 0 }));
    assert_eq!(transport.delivered_targets(), vec!["/a", "/b", "/c"]);
    assert_eq!(transport.attempts(), 3);
    assert_eq!(transport.max_in_flight(), 1);

    // Nothing else was scheduled behind the first drain
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_offline_mid_drain_stops_replay() {
    let queue = queue();
    for target in ["/a", "/b", "/c"] {
      queue.enqueue(WriteRequest::new("POST", target)).await;
    }
    let transport = Arc::new(ScriptedTransport::new().with_delay(Duration::from_millis(100)));

    let (handle, _task) = ConnectivityMonitor::init(false, queue.clone(), transport.clone());
    let mut events = handle.events();

    handle.reachability_changed(Reachability::Reachable);
    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.reachability_changed(Reachability::Unreachable);

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, SyncEvent::Reconciled(DrainSummary { sent: 1, failed: 0 }));
    assert_eq!(queue.count().await, 2);
    assert!(!handle.state().is_online);
  }

  #[tokio::test]
  async fn test_sync_now_ignored_offline() {
    let queue = queue();
    queue.enqueue(WriteRequest::new("POST", "/a")).await;
    let transport = Arc::new(ScriptedTransport::new());

    let (handle, _task) = ConnectivityMonitor::init(false, queue.clone(), transport.clone());
    let mut rx = handle.subscribe();
    settle(&mut rx, |s| s.pending_count == 1).await;

    handle.sync_now();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(transport.attempts(), 0);
    assert!(!handle.state().is_syncing);
    assert_eq!(handle.state().pending_count, 1);
  }

  #[tokio::test]
  async fn test_refresh_picks_up_removals_outside_monitor() {
    let queue = queue();
    let a = queue.enqueue(WriteRequest::new("POST", "/a")).await.unwrap();
    queue.enqueue(WriteRequest::new("POST", "/b")).await;

    let (handle, _task) =
      ConnectivityMonitor::init(false, queue.clone(), Arc::new(ScriptedTransport::new()));
    let mut rx = handle.subscribe();
    settle(&mut rx, |s| s.pending_count == 2).await;

    // Removals emit no queue event, so the count is stale until asked
    assert!(queue.remove(a).await);
    handle.refresh_pending_count();

    let state = settle(&mut rx, |s| s.pending_count == 1).await;
    assert!(!state.is_online);
  }

  #[tokio::test]
  async fn test_failed_drain_keeps_pending_count() {
    let queue = queue();
    queue.enqueue(WriteRequest::new("POST", "/a")).await;
    queue.enqueue(WriteRequest::new("POST", "/b")).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.fail_target("/a");

    let (handle, _task) = ConnectivityMonitor::init(false, queue.clone(), transport.clone());
    let mut events = handle.events();

    handle.reachability_changed(Reachability::Reachable);
    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, SyncEvent::Reconciled(DrainSummary { sent: 0, failed: 1 }));

    let mut rx = handle.subscribe();
    let state = settle(&mut rx, |s| !s.is_syncing).await;
    assert_eq!(state.pending_count, 2);
  }

  #[tokio::test]
  async fn test_teardown_stops_loop() {
    let (handle, task) = ConnectivityMonitor::init(true, queue(), Arc::new(ScriptedTransport::new()));

    handle.teardown();
    timeout(WAIT, task).await.unwrap().unwrap();
    assert!(handle.is_closed());
  }
}
