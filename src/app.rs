use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use posync::config::Config;
use posync::{
  drain, ConnectivityMonitor, ConnectivityState, HttpTransport, NoopStore, PendingWriteQueue,
  ReachabilityProbe, ResponseCache, SqliteStore, Storage, SyncEvent, Transport, WriteRequest,
};

use crate::{CacheCommand, Command};

/// Wiring for the command-line front end
pub struct App {
  cache: ResponseCache,
  queue: PendingWriteQueue,
  transport: Arc<dyn Transport>,
  probe: Option<ReachabilityProbe>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let origin = config.server.origin_url()?;
    let store = open_store(&config);

    let cache = ResponseCache::new(Arc::clone(&store), origin.clone())
      .with_default_max_age(config.cache.max_age());
    let queue = PendingWriteQueue::new(store);
    let transport: Arc<dyn Transport> =
      Arc::new(HttpTransport::new(origin, Config::get_api_token())?);

    let probe = match config.server.health_url()? {
      Some(url) => Some(ReachabilityProbe::new(url, config.sync.probe_interval())?),
      None => None,
    };

    Ok(Self {
      cache,
      queue,
      transport,
      probe,
    })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Status => self.status().await,
      Command::Pending => self.pending().await,
      Command::Enqueue {
        method,
        target,
        payload,
        headers,
      } => self.enqueue(method, target, payload, headers).await,
      Command::Remove { id } => {
        if self.queue.remove(id).await {
          println!("removed #{}", id);
          Ok(())
        } else {
          Err(eyre!("Failed to remove pending write #{}", id))
        }
      }
      Command::Drain => self.drain().await,
      Command::Cache(cmd) => self.cache_command(cmd).await,
      Command::Watch => self.watch().await,
    }
  }

  /// Reachability right now. Without a configured origin there is nothing to
  /// probe, so the network is assumed to be up.
  async fn is_reachable(&self) -> bool {
    match &self.probe {
      Some(probe) => probe.check().await,
      None => true,
    }
  }

  async fn status(&self) -> Result<()> {
    let state = ConnectivityState {
      is_online: self.is_reachable().await,
      is_syncing: false,
      pending_count: self.queue.count().await,
    };

    println!("online:  {}", state.is_online);
    println!("pending: {}", state.pending_count);
    if let Some(line) = state.status_line() {
      println!("{}", line);
    }
    Ok(())
  }

  async fn pending(&self) -> Result<()> {
    let writes = self.queue.list().await;
    if writes.is_empty() {
      println!("no pending writes");
    }

    for write in writes {
      let created = write
        .created_at_utc()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
      println!(
        "#{:<5} {:<7} {:<40} retries={} created={}",
        write.id, write.request.method, write.request.target, write.retries, created
      );
    }
    Ok(())
  }

  async fn enqueue(
    &self,
    method: String,
    target: String,
    payload: Option<String>,
    headers: Vec<(String, String)>,
  ) -> Result<()> {
    let request = WriteRequest {
      method: method.to_uppercase(),
      target,
      payload,
      headers: (!headers.is_empty()).then(|| headers.into_iter().collect::<BTreeMap<_, _>>()),
    };

    match self.queue.enqueue(request).await {
      Some(id) => {
        println!("queued #{}", id);
        Ok(())
      }
      None => Err(eyre!("Could not queue write; durable storage is unavailable")),
    }
  }

  async fn drain(&self) -> Result<()> {
    if !self.is_reachable().await {
      println!("server unreachable, nothing sent");
      return Ok(());
    }

    let summary = drain(&self.queue, self.transport.as_ref(), || true, |write| {
      println!("sent #{} {} {}", write.id, write.request.method, write.request.target);
    })
    .await;

    println!("{} sent, {} failed", summary.sent, summary.failed);
    Ok(())
  }

  async fn cache_command(&self, cmd: CacheCommand) -> Result<()> {
    match cmd {
      CacheCommand::Key { url } => println!("{}", self.cache.cache_key_for_get(&url)),
      CacheCommand::Get { key, max_age_ms } => match self.cache.get_entry(&key, max_age_ms).await {
        Some(entry) => {
          println!("{}", serde_json::to_string_pretty(&entry.value)?);
          if let Some(at) = entry.updated_at_utc() {
            eprintln!("updated {}", at.to_rfc3339());
          }
        }
        None => println!("(absent)"),
      },
      CacheCommand::Put { key, json } => {
        let value: Value =
          serde_json::from_str(&json).map_err(|e| eyre!("Invalid JSON value: {}", e))?;
        self.cache.put(&key, &value).await;
      }
      CacheCommand::Invalidate { key } => self.cache.invalidate(&key).await,
    }
    Ok(())
  }

  /// Run the monitor, fed by the probe, until Ctrl-C.
  async fn watch(&self) -> Result<()> {
    let online = self.is_reachable().await;
    let (monitor, task) =
      ConnectivityMonitor::init(online, self.queue.clone(), Arc::clone(&self.transport));

    let probe_task = match &self.probe {
      Some(probe) => Some(probe.clone().spawn(online, monitor.clone())),
      None => {
        warn!("No server.origin configured; reachability will not change");
        None
      }
    };

    // Anything left over from a previous session goes out right away
    if online {
      monitor.sync_now();
    }

    let mut state = monitor.subscribe();
    let mut events = monitor.events();
    print_state(&state.borrow());

    loop {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => break,
        changed = state.changed() => {
          if changed.is_err() {
            break;
          }
          print_state(&state.borrow_and_update());
        }
        event = events.recv() => {
          if let Ok(SyncEvent::Reconciled(summary)) = event {
            println!("sync finished: {} sent, {} failed", summary.sent, summary.failed);
            if summary.should_invalidate() {
              info!("{} write(s) reconciled, cached reads may be stale", summary.sent);
            }
          }
        }
      }
    }

    monitor.teardown();
    if let Some(probe_task) = probe_task {
      probe_task.abort();
    }
    task
      .await
      .map_err(|e| eyre!("Connectivity monitor failed: {}", e))?;

    Ok(())
  }
}

fn print_state(state: &ConnectivityState) {
  match state.status_line() {
    Some(line) => println!("{}", line),
    None => println!("online, nothing pending"),
  }
}

/// Open the durable store, degrading to a non-persistent one on failure.
fn open_store(config: &Config) -> Arc<dyn Storage> {
  let opened = config
    .cache
    .db_path()
    .and_then(|path| SqliteStore::open(&path).map_err(|e| eyre!("{}: {}", path.display(), e)));

  match opened {
    Ok(store) => Arc::new(store),
    Err(e) => {
      warn!("Durable storage unavailable, running without it: {}", e);
      Arc::new(NoopStore)
    }
  }
}
