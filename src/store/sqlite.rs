//! SQLite storage backend.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{Storage, StoreFault, StoreResult};
use crate::types::{CacheEntry, PendingWrite, WriteRequest};

/// Schema for both tables.
const SCHEMA: &str = r#"
-- Read-through response cache (value is serialized JSON)
CREATE TABLE IF NOT EXISTS api_cache (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_api_cache_updated
    ON api_cache(updated_at);

-- Pending write log; AUTOINCREMENT keeps ids from being reused after deletes
CREATE TABLE IF NOT EXISTS pending_writes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    target TEXT NOT NULL,
    payload TEXT,
    headers TEXT,
    created_at INTEGER NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pending_writes_created
    ON pending_writes(created_at);
"#;

/// SQLite-based storage implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self, StoreFault> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreFault::Unavailable(format!(
          "Failed to create database directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self, StoreFault> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, StoreFault> {
    conn.execute_batch(SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreFault> {
    self.conn.lock().map_err(|_| StoreFault::LockPoisoned)
  }

  fn try_get_cached(&self, key: &str) -> Result<Option<CacheEntry>, StoreFault> {
    let conn = self.lock()?;
    let row: Option<(String, i64)> = conn
      .query_row(
        "SELECT value, updated_at FROM api_cache WHERE key = ?1",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    match row {
      Some((data, updated_at)) => Ok(Some(CacheEntry {
        key: key.to_string(),
        value: serde_json::from_str(&data)?,
        updated_at,
      })),
      None => Ok(None),
    }
  }

  fn try_put_cached(&self, key: &str, value: &Value, now_ms: i64) -> Result<Option<i64>, StoreFault> {
    let data = serde_json::to_string(value)?;
    let conn = self.lock()?;
    let stored: i64 = conn.query_row(
      "INSERT INTO api_cache (key, value, updated_at) VALUES (?1, ?2, ?3)
       ON CONFLICT(key) DO UPDATE SET
         value = excluded.value,
         updated_at = MAX(api_cache.updated_at, excluded.updated_at)
       RETURNING updated_at",
      params![key, data, now_ms],
      |row| row.get(0),
    )?;
    Ok(Some(stored))
  }

  fn try_delete_cached(&self, key: &str) -> Result<Option<()>, StoreFault> {
    let conn = self.lock()?;
    let deleted = conn.execute("DELETE FROM api_cache WHERE key = ?1", params![key])?;
    Ok((deleted > 0).then_some(()))
  }

  fn try_append_write(
    &self,
    request: &WriteRequest,
    created_at: i64,
  ) -> Result<Option<i64>, StoreFault> {
    let headers = request
      .headers
      .as_ref()
      .map(serde_json::to_string)
      .transpose()?;

    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO pending_writes (method, target, payload, headers, created_at, retries)
       VALUES (?1, ?2, ?3, ?4, ?5, 0)",
      params![
        request.method,
        request.target,
        request.payload,
        headers,
        created_at
      ],
    )?;
    Ok(Some(conn.last_insert_rowid()))
  }

  fn try_list_writes(&self) -> Result<Option<Vec<PendingWrite>>, StoreFault> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT id, method, target, payload, headers, created_at, retries
       FROM pending_writes
       ORDER BY id",
    )?;

    let rows = stmt
      .query_map([], |row| {
        Ok(PendingRow {
          id: row.get(0)?,
          method: row.get(1)?,
          target: row.get(2)?,
          payload: row.get(3)?,
          headers: row.get(4)?,
          created_at: row.get(5)?,
          retries: row.get(6)?,
        })
      })?
      .collect::<Result<Vec<_>, _>>()?;

    let writes = rows
      .into_iter()
      .map(PendingRow::into_pending_write)
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(writes))
  }

  fn try_delete_write(&self, id: i64) -> Result<Option<()>, StoreFault> {
    let conn = self.lock()?;
    let deleted = conn.execute("DELETE FROM pending_writes WHERE id = ?1", params![id])?;
    Ok((deleted > 0).then_some(()))
  }

  fn try_increment_retries(&self, id: i64) -> Result<Option<u32>, StoreFault> {
    let conn = self.lock()?;
    let retries = conn
      .query_row(
        "UPDATE pending_writes SET retries = retries + 1 WHERE id = ?1 RETURNING retries",
        params![id],
        |row| row.get(0),
      )
      .optional()?;
    Ok(retries)
  }

  fn try_count_writes(&self) -> Result<Option<u64>, StoreFault> {
    let conn = self.lock()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending_writes", [], |row| row.get(0))?;
    Ok(Some(u64::try_from(count).unwrap_or(0)))
  }
}

/// Raw `pending_writes` row before the headers column is decoded.
struct PendingRow {
  id: i64,
  method: String,
  target: String,
  payload: Option<String>,
  headers: Option<String>,
  created_at: i64,
  retries: u32,
}

impl PendingRow {
  fn into_pending_write(self) -> Result<PendingWrite, StoreFault> {
    let headers: Option<BTreeMap<String, String>> = self
      .headers
      .as_deref()
      .map(serde_json::from_str)
      .transpose()?;

    Ok(PendingWrite {
      id: self.id,
      request: WriteRequest {
        method: self.method,
        target: self.target,
        payload: self.payload,
        headers,
      },
      created_at: self.created_at,
      retries: self.retries,
    })
  }
}

impl Storage for SqliteStore {
  fn get_cached(&self, key: &str) -> StoreResult<CacheEntry> {
    self.try_get_cached(key).into()
  }

  fn put_cached(&self, key: &str, value: &Value, now_ms: i64) -> StoreResult<i64> {
    self.try_put_cached(key, value, now_ms).into()
  }

  fn delete_cached(&self, key: &str) -> StoreResult<()> {
    self.try_delete_cached(key).into()
  }

  fn append_write(&self, request: &WriteRequest, created_at: i64) -> StoreResult<i64> {
    self.try_append_write(request, created_at).into()
  }

  fn list_writes(&self) -> StoreResult<Vec<PendingWrite>> {
    self.try_list_writes().into()
  }

  fn delete_write(&self, id: i64) -> StoreResult<()> {
    self.try_delete_write(id).into()
  }

  fn increment_retries(&self, id: i64) -> StoreResult<u32> {
    self.try_increment_retries(id).into()
  }

  fn count_writes(&self) -> StoreResult<u64> {
    self.try_count_writes().into()
  }
}
