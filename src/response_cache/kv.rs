//! Key-value backing stores with per-entry expiry.

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Minimal key-value surface the response cache needs.
///
/// Entries are immutable once written; `setex` on an existing key replaces
/// the value and its expiry.
#[async_trait]
pub trait KvStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<String>>;

  async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<()>;

  /// Live keys matching a glob pattern (`*`, `?`).
  async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

  /// Returns the number of keys removed.
  async fn del(&self, keys: &[String]) -> Result<usize>;

  async fn flush(&self) -> Result<()>;
}

#[async_trait]
impl<K: KvStore + ?Sized> KvStore for Box<K> {
  async fn get(&self, key: &str) -> Result<Option<String>> {
    (**self).get(key).await
  }

  async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<()> {
    (**self).setex(key, ttl, value).await
  }

  async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
    (**self).keys(pattern).await
  }

  async fn del(&self, keys: &[String]) -> Result<usize> {
    (**self).del(keys).await
  }

  async fn flush(&self) -> Result<()> {
    (**self).flush().await
  }
}

/// Store that never keeps anything. Used when the response cache is disabled.
pub struct NoopKv;

#[async_trait]
impl KvStore for NoopKv {
  async fn get(&self, _key: &str) -> Result<Option<String>> {
    Ok(None) // Always miss
  }

  async fn setex(&self, _key: &str, _ttl: Duration, _value: &str) -> Result<()> {
    Ok(()) // Discard
  }

  async fn keys(&self, _pattern: &str) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  async fn del(&self, _keys: &[String]) -> Result<usize> {
    Ok(0)
  }

  async fn flush(&self) -> Result<()> {
    Ok(())
  }
}

/// In-process store, mostly for tests and one-shot commands.
#[derive(Default)]
pub struct MemoryKv {
  entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryKv {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, (String, Instant)>>> {
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Cap for TTLs too large to add to the monotonic clock (about a century).
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn expiry_after(ttl: Duration) -> Instant {
  let now = Instant::now();
  now
    .checked_add(ttl)
    .or_else(|| now.checked_add(FAR_FUTURE))
    .unwrap_or(now)
}

#[async_trait]
impl KvStore for MemoryKv {
  async fn get(&self, key: &str) -> Result<Option<String>> {
    let mut entries = self.lock()?;
    let expired = match entries.get(key) {
      Some((value, expires)) if *expires > Instant::now() => return Ok(Some(value.clone())),
      Some(_) => true,
      None => false,
    };
    if expired {
      entries.remove(key);
    }
    Ok(None)
  }

  async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<()> {
    self
      .lock()?
      .insert(key.to_string(), (value.to_string(), expiry_after(ttl)));
    Ok(())
  }

  async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
    let now = Instant::now();
    let mut keys: Vec<String> = self
      .lock()?
      .iter()
      .filter(|(key, (_, expires))| *expires > now && glob_match(pattern, key))
      .map(|(key, _)| key.clone())
      .collect();
    keys.sort();
    Ok(keys)
  }

  async fn del(&self, keys: &[String]) -> Result<usize> {
    let mut entries = self.lock()?;
    Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count())
  }

  async fn flush(&self) -> Result<()> {
    self.lock()?.clear();
    Ok(())
  }
}

/// SQLite-based store; expired rows are ignored on read and swept on write.
pub struct SqliteKv {
  conn: Mutex<Connection>,
}

const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_kv_entries_expiry ON kv_entries(expires_at);
"#;

impl SqliteKv {
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open response cache at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory response cache: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| eyre!("Failed to run response cache migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

#[async_trait]
impl KvStore for SqliteKv {
  async fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT value FROM kv_entries WHERE key = ?1 AND expires_at > ?2",
        params![key, now_millis()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache key {}: {}", key, e))
  }

  async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<()> {
    let conn = self.lock()?;
    let now = now_millis();
    let expires_at = now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));

    conn
      .execute("DELETE FROM kv_entries WHERE expires_at <= ?1", params![now])
      .map_err(|e| eyre!("Failed to sweep expired cache entries: {}", e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)",
        params![key, value, expires_at],
      )
      .map_err(|e| eyre!("Failed to write cache key {}: {}", key, e))?;

    Ok(())
  }

  async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT key FROM kv_entries WHERE key GLOB ?1 AND expires_at > ?2 ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![pattern, now_millis()], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache keys: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache keys: {}", e))?;

    Ok(keys)
  }

  async fn del(&self, keys: &[String]) -> Result<usize> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut removed = 0;
    for key in keys {
      removed += tx
        .execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
        .map_err(|e| eyre!("Failed to delete cache key {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(removed)
  }

  async fn flush(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM kv_entries", [])
      .map_err(|e| eyre!("Failed to flush response cache: {}", e))?;
    Ok(())
  }
}

/// Redis-style glob matching for `*` and `?`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
  let pattern: Vec<char> = pattern.chars().collect();
  let text: Vec<char> = text.chars().collect();

  let (mut p, mut t) = (0, 0);
  let mut backtrack: Option<(usize, usize)> = None;

  while t < text.len() {
    match pattern.get(p) {
      Some('*') => {
        backtrack = Some((p, t));
        p += 1;
      }
      Some(&c) if c == '?' || c == text[t] => {
        p += 1;
        t += 1;
      }
      _ => match backtrack {
        Some((star, matched)) => {
          p = star + 1;
          t = matched + 1;
          backtrack = Some((star, matched + 1));
        }
        None => return false,
      },
    }
  }

  pattern[p..].iter().all(|&c| c == '*')
}
