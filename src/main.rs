mod app;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use posync::config::Config;

#[derive(Parser, Debug)]
#[command(name = "posync")]
#[command(about = "Offline cache and pending-write queue for point-of-sale clients")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/posync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Show connectivity and queue status
  Status,
  /// List pending writes in replay order
  Pending,
  /// Queue a write for later delivery
  Enqueue {
    #[arg(short, long)]
    method: String,
    /// Absolute URL or path relative to server.origin
    #[arg(short, long)]
    target: String,
    #[arg(short, long)]
    payload: Option<String>,
    /// Header as NAME:VALUE (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
  },
  /// Remove a pending write by id
  Remove { id: i64 },
  /// Replay pending writes now
  Drain,
  /// Inspect or modify the response cache
  #[command(subcommand)]
  Cache(CacheCommand),
  /// Run the connectivity monitor until interrupted
  Watch,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// Print the cache key for a GET of URL
  Key { url: String },
  /// Print a cached value
  Get {
    key: String,
    /// Freshness window; 0 returns any age
    #[arg(long)]
    max_age_ms: Option<i64>,
  },
  /// Store a JSON value
  Put { key: String, json: String },
  /// Drop a cached value
  Invalidate { key: String },
}

fn parse_header(s: &str) -> Result<(String, String), String> {
  let (name, value) = s
    .split_once(':')
    .ok_or_else(|| format!("Expected NAME:VALUE, got {}", s))?;
  Ok((name.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = posync::logging::init(&config.log)?;

  let app = app::App::new(config)?;
  app.run(args.command).await?;

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_header() {
    assert_eq!(
      parse_header("Content-Type: application/json").unwrap(),
      ("Content-Type".to_string(), "application/json".to_string())
    );
    assert!(parse_header("no-colon").is_err());
  }

  #[test]
  fn test_enqueue_args() {
    let args = Args::try_parse_from([
      "posync", "enqueue", "-m", "POST", "-t", "/orders", "-p", "{}", "-H", "X-Till: 4",
    ])
    .unwrap();

    match args.command {
      Command::Enqueue { method, headers, .. } => {
        assert_eq!(method, "POST");
        assert_eq!(headers, vec![("X-Till".to_string(), "4".to_string())]);
      }
      other => panic!("unexpected command {:?}", other),
    }
  }
}
