//! Versioned response buckets and their SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::request::Response;

/// A response stored in a bucket.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
}

/// Trait for bucket storage backends.
///
/// Entries are keyed by request URL; a second `put` for the same URL
/// overwrites the first.
pub trait BucketStorage: Send + Sync + 'static {
  /// Create the bucket if it does not exist.
  fn open_bucket(&self, bucket: &str) -> Result<()>;

  fn match_url(&self, bucket: &str, url: &str) -> Result<Option<CachedResponse>>;

  fn put(&self, bucket: &str, url: &str, response: &Response) -> Result<()>;

  fn bucket_names(&self) -> Result<Vec<String>>;

  /// Remove a bucket and all of its entries. Returns false if it did not exist.
  fn delete_bucket(&self, bucket: &str) -> Result<bool>;

  fn entry_count(&self, bucket: &str) -> Result<usize>;
}

/// SQLite-based bucket storage.
pub struct SqliteBuckets {
  conn: Mutex<Connection>,
}

const BUCKET_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS buckets (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS bucket_entries (
    bucket TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (bucket, url),
    FOREIGN KEY (bucket) REFERENCES buckets(name) ON DELETE CASCADE
);
"#;

impl SqliteBuckets {
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch("PRAGMA foreign_keys = ON;")
      .map_err(|e| eyre!("Failed to enable foreign keys: {}", e))?;
    conn
      .execute_batch(BUCKET_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

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

impl BucketStorage for SqliteBuckets {
  fn open_bucket(&self, bucket: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO buckets (name) VALUES (?1)",
        params![bucket],
      )
      .map_err(|e| eyre!("Failed to open bucket {}: {}", bucket, e))?;
    Ok(())
  }

  fn match_url(&self, bucket: &str, url: &str) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM bucket_entries
         WHERE bucket = ?1 AND url = ?2",
        params![bucket, url],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", url, e))?;

    let Some((status, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Corrupt cached headers for {}: {}", url, e))?;
    let cached_at = DateTime::parse_from_rfc3339(&cached_at)
      .map_err(|e| eyre!("Failed to parse datetime '{}': {}", cached_at, e))?
      .with_timezone(&Utc);

    Ok(Some(CachedResponse {
      response: Response {
        status,
        headers,
        body,
      },
      cached_at,
    }))
  }

  fn put(&self, bucket: &str, url: &str, response: &Response) -> Result<()> {
    let mut conn = self.lock()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO buckets (name) VALUES (?1)",
      params![bucket],
    )
    .map_err(|e| eyre!("Failed to open bucket {}: {}", bucket, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO bucket_entries (bucket, url, status, headers, body, cached_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        bucket,
        url,
        response.status,
        headers,
        response.body,
        Utc::now().to_rfc3339()
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", url, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM buckets ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list buckets: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read bucket names: {}", e))?;

    Ok(names)
  }

  fn delete_bucket(&self, bucket: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute("DELETE FROM buckets WHERE name = ?1", params![bucket])
      .map_err(|e| eyre!("Failed to delete bucket {}: {}", bucket, e))?;
    Ok(removed > 0)
  }

  fn entry_count(&self, bucket: &str) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM bucket_entries WHERE bucket = ?1",
        params![bucket],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries in {}: {}", bucket, e))?;
    Ok(count as usize)
  }
}
