use color_eyre::{eyre::eyre, Result};
use reqwest::Client;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use super::monitor::{MonitorHandle, Reachability};

/// Periodic HTTP probe standing in for the platform's online/offline events.
///
/// Any HTTP response, whatever the status, counts as reachable. Only
/// transitions are forwarded to the monitor.
#[derive(Clone)]
pub struct ReachabilityProbe {
  client: Client,
  url: Url,
  interval: Duration,
}

impl ReachabilityProbe {
  pub fn new(url: Url, interval: Duration) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(5))
      .build()
      .map_err(|e| eyre!("Failed to create probe client: {}", e))?;

    Ok(Self {
      client,
      url,
      interval,
    })
  }

  /// Probe once.
  pub async fn check(&self) -> bool {
    match self.client.head(self.url.clone()).send().await {
      Ok(response) => {
        debug!("Probe {} answered {}", self.url, response.status());
        true
      }
      Err(e) => {
        debug!("Probe {} failed: {}", self.url, e);
        false
      }
    }
  }

  /// Keep probing and report changes to `monitor` until it shuts down.
  pub fn spawn(self, initially_online: bool, monitor: MonitorHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut last = initially_online;
      let mut ticker = tokio::time::interval(self.interval);
      // The first tick fires immediately; initial state is already known
      ticker.tick().await;

      loop {
        ticker.tick().await;
        if monitor.is_closed() {
          break;
        }

        let now = self.check().await;
        if now != last {
          monitor.reachability_changed(if now {
            Reachability::Reachable
          } else {
            Reachability::Unreachable
          });
          last = now;
        }
      }
    })
  }
}
