//! Local persistent store for domain records and the pending sync queue.
//!
//! Everything the app needs while offline lives here:
//! - Domain records (projects, tasks, ideas, focus sessions) as JSON rows
//! - The FIFO queue of mutations waiting to be replayed against the server
//! - Small user data blobs (profile, settings)

mod offline_id;
mod operation;
mod record;

pub use offline_id::{generate_offline_id, is_offline_id};
pub use operation::{should_retry_sync, OperationKind, StoreName, SyncOperation};
pub use record::Record;

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed local store.
pub struct LocalStore {
  conn: Mutex<Connection>,
}

/// Schema for the local store.
const STORE_SCHEMA: &str = r#"
-- Domain records (stores JSON keyed by collection + id)
CREATE TABLE IF NOT EXISTS records (
    store TEXT NOT NULL,
    id INTEGER NOT NULL,
    data TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (store, id)
);

-- Pending mutations, replayed in (timestamp, seq) order
CREATE TABLE IF NOT EXISTS pending_sync (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    store TEXT NOT NULL,
    operation TEXT NOT NULL,
    data TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pending_sync_order
    ON pending_sync(timestamp, seq);

CREATE TABLE IF NOT EXISTS user_data (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

type PendingRow = (String, String, String, String, i64, u32);

const PENDING_COLUMNS: &str = "id, store, operation, data, timestamp, retries";

impl LocalStore {
  /// Open or create the store at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open local store at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

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

  // ==========================================================================
  // Records
  // ==========================================================================

  pub fn put<T: Record>(&self, record: &T) -> Result<()> {
    let value =
      serde_json::to_value(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;
    let conn = self.lock()?;
    upsert_row(&conn, T::store(), record.id(), &value)
  }

  pub fn put_many<T: Record>(&self, records: &[T]) -> Result<()> {
    let rows = records
      .iter()
      .map(|r| {
        serde_json::to_value(r)
          .map(|value| (r.id(), value))
          .map_err(|e| eyre!("Failed to serialize record: {}", e))
      })
      .collect::<Result<Vec<_>>>()?;

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (id, value) in &rows {
      upsert_row(&tx, T::store(), *id, value)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  pub fn get<T: Record>(&self, id: i64) -> Result<Option<T>> {
    self
      .get_value(T::store(), id)?
      .map(|v| serde_json::from_value(v).map_err(|e| eyre!("Failed to deserialize record: {}", e)))
      .transpose()
  }

  pub fn get_all<T: Record>(&self) -> Result<Vec<T>> {
    self
      .all_values(T::store())?
      .into_iter()
      .map(|v| serde_json::from_value(v).map_err(|e| eyre!("Failed to deserialize record: {}", e)))
      .collect()
  }

  /// Records whose top-level `field` equals `value` (e.g. tasks by `projectId`).
  pub fn get_by_field<T: Record>(&self, field: &str, value: &Value) -> Result<Vec<T>> {
    self
      .all_values(T::store())?
      .into_iter()
      .filter(|v| v.get(field) == Some(value))
      .map(|v| serde_json::from_value(v).map_err(|e| eyre!("Failed to deserialize record: {}", e)))
      .collect()
  }

  pub fn put_value(&self, store: StoreName, value: &Value) -> Result<()> {
    let conn = self.lock()?;
    upsert_record(&conn, store, value)
  }

  pub fn get_value(&self, store: StoreName, id: i64) -> Result<Option<Value>> {
    let conn = self.lock()?;

    let data: Option<String> = conn
      .query_row(
        "SELECT data FROM records WHERE store = ?1 AND id = ?2",
        params![store.as_str(), id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read record {}/{}: {}", store, id, e))?;

    data
      .map(|d| serde_json::from_str(&d).map_err(|e| eyre!("Corrupt record {}/{}: {}", store, id, e)))
      .transpose()
  }

  pub fn all_values(&self, store: StoreName) -> Result<Vec<Value>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT data FROM records WHERE store = ?1 ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<String> = stmt
      .query_map(params![store.as_str()], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query records: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read records: {}", e))?;

    rows
      .iter()
      .map(|d| serde_json::from_str(d).map_err(|e| eyre!("Corrupt record in {}: {}", store, e)))
      .collect()
  }

  pub fn delete(&self, store: StoreName, id: i64) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM records WHERE store = ?1 AND id = ?2",
        params![store.as_str(), id],
      )
      .map_err(|e| eyre!("Failed to delete record {}/{}: {}", store, id, e))?;
    Ok(removed > 0)
  }

  pub fn clear_store(&self, store: StoreName) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM records WHERE store = ?1", params![store.as_str()])
      .map_err(|e| eyre!("Failed to clear {}: {}", store, e))?;
    Ok(())
  }

  /// Move an offline record to its server-assigned id and drop the
  /// `_offline` marker. Returns false if the record no longer exists.
  pub fn rekey(&self, store: StoreName, old_id: i64, new_id: i64) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let data: Option<String> = tx
      .query_row(
        "SELECT data FROM records WHERE store = ?1 AND id = ?2",
        params![store.as_str(), old_id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read record {}/{}: {}", store, old_id, e))?;

    let Some(data) = data else {
      return Ok(false);
    };

    let mut value: Value =
      serde_json::from_str(&data).map_err(|e| eyre!("Corrupt record {}/{}: {}", store, old_id, e))?;
    if let Value::Object(map) = &mut value {
      map.insert("id".to_string(), json!(new_id));
      map.remove("_offline");
    }

    tx.execute(
      "DELETE FROM records WHERE store = ?1 AND id = ?2",
      params![store.as_str(), old_id],
    )
    .map_err(|e| eyre!("Failed to remove record {}/{}: {}", store, old_id, e))?;
    upsert_record(&tx, store, &value)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(true)
  }

  /// Replace all server-confirmed records of a store with `records`.
  /// Offline-originated records (negative ids) are kept.
  pub fn replace_confirmed(&self, store: StoreName, records: &[Value]) -> Result<usize> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM records WHERE store = ?1 AND id > 0",
      params![store.as_str()],
    )
    .map_err(|e| eyre!("Failed to clear confirmed {}: {}", store, e))?;

    for record in records {
      upsert_record(&tx, store, record)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(records.len())
  }

  // ==========================================================================
  // Pending sync queue
  // ==========================================================================

  /// Append a new operation to the queue.
  pub fn add_pending(
    &self,
    store: StoreName,
    operation: OperationKind,
    data: Value,
  ) -> Result<SyncOperation> {
    let op = SyncOperation::new(store, operation, data);
    self.insert_pending(&op)?;
    Ok(op)
  }

  pub fn insert_pending(&self, op: &SyncOperation) -> Result<()> {
    let conn = self.lock()?;
    let data =
      serde_json::to_string(&op.data).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_sync (id, store, operation, data, timestamp, retries)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
          op.id,
          op.store.as_str(),
          op.operation.as_str(),
          data,
          op.timestamp,
          op.retries
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue operation {}: {}", op.id, e))?;

    Ok(())
  }

  /// All pending operations in replay order.
  pub fn pending_operations(&self) -> Result<Vec<SyncOperation>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(&format!(
        "SELECT {} FROM pending_sync ORDER BY timestamp, seq",
        PENDING_COLUMNS
      ))
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<PendingRow> = stmt
      .query_map([], read_pending_row)
      .map_err(|e| eyre!("Failed to query pending operations: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read pending operations: {}", e))?;

    rows.into_iter().map(operation_from_row).collect()
  }

  pub fn get_pending(&self, id: &str) -> Result<Option<SyncOperation>> {
    let conn = self.lock()?;

    let row: Option<PendingRow> = conn
      .query_row(
        &format!("SELECT {} FROM pending_sync WHERE id = ?1", PENDING_COLUMNS),
        params![id],
        read_pending_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to read pending operation {}: {}", id, e))?;

    row.map(operation_from_row).transpose()
  }

  pub fn remove_pending(&self, id: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute("DELETE FROM pending_sync WHERE id = ?1", params![id])
      .map_err(|e| eyre!("Failed to remove pending operation {}: {}", id, e))?;
    Ok(removed > 0)
  }

  pub fn update_pending_retries(&self, id: &str, retries: u32) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE pending_sync SET retries = ?1 WHERE id = ?2",
        params![retries, id],
      )
      .map_err(|e| eyre!("Failed to update retries for {}: {}", id, e))?;
    Ok(())
  }

  pub fn update_pending_data(&self, id: &str, data: &Value) -> Result<()> {
    let conn = self.lock()?;
    let data =
      serde_json::to_string(data).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;
    conn
      .execute(
        "UPDATE pending_sync SET data = ?1 WHERE id = ?2",
        params![data, id],
      )
      .map_err(|e| eyre!("Failed to update payload for {}: {}", id, e))?;
    Ok(())
  }

  /// Point queued operations that still reference a placeholder id at the
  /// server-assigned id. Returns the number of rewritten operations.
  pub fn rekey_pending_refs(&self, store: StoreName, old_id: i64, new_id: i64) -> Result<usize> {
    let stale: Vec<SyncOperation> = self
      .pending_operations()?
      .into_iter()
      .filter(|op| op.store == store && op.record_id() == Some(old_id))
      .collect();

    for op in &stale {
      let data = match &op.data {
        Value::Object(map) => {
          let mut map = map.clone();
          map.insert("id".to_string(), json!(new_id));
          map.remove("_offline");
          Value::Object(map)
        }
        _ => json!(new_id),
      };
      self.update_pending_data(&op.id, &data)?;
    }

    Ok(stale.len())
  }

  pub fn pending_count(&self) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_sync", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count pending operations: {}", e))?;
    Ok(count as usize)
  }

  // ==========================================================================
  // User data
  // ==========================================================================

  pub fn set_user_data<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
    let conn = self.lock()?;
    let data =
      serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize user data: {}", e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO user_data (key, value, updated_at) VALUES (?1, ?2, ?3)",
        params![key, data, Utc::now().timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to store user data {}: {}", key, e))?;
    Ok(())
  }

  pub fn get_user_data<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    let conn = self.lock()?;
    let data: Option<String> = conn
      .query_row(
        "SELECT value FROM user_data WHERE key = ?1",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read user data {}: {}", key, e))?;

    data
      .map(|d| serde_json::from_str(&d).map_err(|e| eyre!("Corrupt user data {}: {}", key, e)))
      .transpose()
  }

  // ==========================================================================
  // Maintenance
  // ==========================================================================

  /// Dump every collection as JSON, for debugging.
  pub fn export(&self) -> Result<Value> {
    let mut out = Map::new();

    for store in StoreName::ALL {
      out.insert(store.as_str().to_string(), Value::Array(self.all_values(store)?));
    }

    let pending = serde_json::to_value(self.pending_operations()?)
      .map_err(|e| eyre!("Failed to serialize pending operations: {}", e))?;
    out.insert("pendingSync".to_string(), pending);

    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT key, value, updated_at FROM user_data ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
    let rows: Vec<(String, String, i64)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to query user data: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read user data: {}", e))?;

    let user_data = rows
      .into_iter()
      .map(|(key, value, updated_at)| {
        let value: Value = serde_json::from_str(&value).unwrap_or(Value::String(value));
        json!({ "key": key, "value": value, "updatedAt": updated_at })
      })
      .collect();
    out.insert("userData".to_string(), Value::Array(user_data));

    Ok(Value::Object(out))
  }

  /// Clear all offline data, pending operations included.
  pub fn clear_all(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch("DELETE FROM records; DELETE FROM pending_sync; DELETE FROM user_data;")
      .map_err(|e| eyre!("Failed to clear offline data: {}", e))?;
    tracing::info!("All offline data cleared");
    Ok(())
  }
}

fn upsert_record(conn: &Connection, store: StoreName, value: &Value) -> Result<()> {
  let id = value
    .get("id")
    .and_then(Value::as_i64)
    .ok_or_else(|| eyre!("Record in {} has no numeric id", store))?;
  upsert_row(conn, store, id, value)
}

fn upsert_row(conn: &Connection, store: StoreName, id: i64, value: &Value) -> Result<()> {
  let data = serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO records (store, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
      params![store.as_str(), id, data, Utc::now().timestamp_millis()],
    )
    .map_err(|e| eyre!("Failed to store record {}/{}: {}", store, id, e))?;

  Ok(())
}

fn read_pending_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
  ))
}

fn operation_from_row(row: PendingRow) -> Result<SyncOperation> {
  let (id, store, operation, data, timestamp, retries) = row;
  Ok(SyncOperation {
    store: store.parse()?,
    operation: operation.parse()?,
    data: serde_json::from_str(&data).map_err(|e| eyre!("Corrupt payload for {}: {}", id, e))?,
    id,
    timestamp,
    retries,
  })
}
