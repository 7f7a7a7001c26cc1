use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Origin relative request paths resolve against (e.g. "https://pos.example.com")
  pub origin: Option<String>,
  /// Path probed to decide reachability
  #[serde(default = "default_health_path")]
  pub health_path: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      origin: None,
      health_path: default_health_path(),
    }
  }
}

fn default_health_path() -> String {
  "/health".to_string()
}

impl ServerConfig {
  pub fn origin_url(&self) -> Result<Option<Url>> {
    self
      .origin
      .as_deref()
      .map(|o| Url::parse(o).map_err(|e| eyre!("Invalid server.origin {}: {}", o, e)))
      .transpose()
  }

  /// Probe URL, if an origin is configured.
  pub fn health_url(&self) -> Result<Option<Url>> {
    match self.origin_url()? {
      Some(origin) => origin
        .join(&self.health_path)
        .map(Some)
        .map_err(|e| eyre!("Invalid server.health_path {}: {}", self.health_path, e)),
      None => Ok(None),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Freshness window for cached reads
  #[serde(default = "default_max_age_secs")]
  pub max_age_secs: u64,
  /// Database location (default: $XDG_DATA_HOME/posync/offline.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_age_secs: default_max_age_secs(),
      path: None,
    }
  }
}

fn default_max_age_secs() -> u64 {
  300
}

impl CacheConfig {
  pub fn max_age(&self) -> chrono::Duration {
    let secs = u32::try_from(self.max_age_secs).unwrap_or(u32::MAX);
    chrono::Duration::seconds(i64::from(secs))
  }

  pub fn db_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(p) => Ok(p.clone()),
      None => Ok(data_dir()?.join("offline.db")),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      probe_interval_secs: default_probe_interval_secs(),
    }
  }
}

fn default_probe_interval_secs() -> u64 {
  15
}

impl SyncConfig {
  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Filter directive, overridden by RUST_LOG
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Log to stderr instead of a file in the data directory
  #[serde(default)]
  pub stderr: bool,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      stderr: false,
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

/// Per-user data directory for the database and logs.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("posync"))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./posync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/posync/config.yaml
  ///
  /// Without a file, defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("posync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("posync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the API token from the environment, if set.
  ///
  /// Checks POSYNC_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("POSYNC_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}
