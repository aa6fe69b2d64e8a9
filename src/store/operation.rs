//! Pending sync operations and the collections they target.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use color_eyre::{eyre::eyre, Report, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Local collections that hold domain records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreName {
  Projects,
  Tasks,
  Ideas,
  FocusSessions,
}

impl StoreName {
  pub const ALL: [StoreName; 4] = [
    StoreName::Projects,
    StoreName::Tasks,
    StoreName::Ideas,
    StoreName::FocusSessions,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      StoreName::Projects => "projects",
      StoreName::Tasks => "tasks",
      StoreName::Ideas => "ideas",
      StoreName::FocusSessions => "focusSessions",
    }
  }

  /// Router name on the remote RPC surface.
  pub fn rpc_router(&self) -> &'static str {
    match self {
      StoreName::Projects => "projects",
      StoreName::Tasks => "tasks",
      StoreName::Ideas => "ideas",
      StoreName::FocusSessions => "focus",
    }
  }

  /// Human readable entity name used in notices.
  pub fn entity_label(&self) -> &'static str {
    match self {
      StoreName::Projects => "project",
      StoreName::Tasks => "task",
      StoreName::Ideas => "idea",
      StoreName::FocusSessions => "focus session",
    }
  }
}

impl fmt::Display for StoreName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for StoreName {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self> {
    StoreName::ALL
      .into_iter()
      .find(|store| store.as_str() == s)
      .ok_or_else(|| eyre!("Unknown store: {}", s))
  }
}

/// Kind of mutation recorded in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
  Create,
  Update,
  Delete,
}

impl OperationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      OperationKind::Create => "create",
      OperationKind::Update => "update",
      OperationKind::Delete => "delete",
    }
  }
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for OperationKind {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "create" => Ok(OperationKind::Create),
      "update" => Ok(OperationKind::Update),
      "delete" => Ok(OperationKind::Delete),
      other => Err(eyre!("Unknown operation: {}", other)),
    }
  }
}

/// A locally queued mutation not yet confirmed by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
  pub id: String,
  pub store: StoreName,
  pub operation: OperationKind,
  pub data: Value,
  /// Creation time in epoch milliseconds; defines replay order
  pub timestamp: i64,
  pub retries: u32,
}

impl SyncOperation {
  pub fn new(store: StoreName, operation: OperationKind, data: Value) -> Self {
    let timestamp = Utc::now().timestamp_millis();
    Self {
      id: new_operation_id(timestamp),
      store,
      operation,
      data,
      timestamp,
      retries: 0,
    }
  }

  pub fn should_retry(&self, max_retries: u32) -> bool {
    should_retry_sync(self, max_retries)
  }

  /// Id of the record this operation refers to.
  ///
  /// Payloads are either the record itself or a bare id (deletes).
  pub fn record_id(&self) -> Option<i64> {
    match &self.data {
      Value::Number(n) => n.as_i64(),
      Value::Object(map) => map.get("id").and_then(Value::as_i64),
      _ => None,
    }
  }

  pub fn describe(&self) -> String {
    format!("{} {}", self.operation, self.store.entity_label())
  }
}

pub fn should_retry_sync(operation: &SyncOperation, max_retries: u32) -> bool {
  operation.retries < max_retries
}

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn new_operation_id(timestamp: i64) -> String {
  let mut rng = rand::rng();
  let suffix: String = (0..9)
    .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
    .collect();
  format!("{}-{}", timestamp, suffix)
}
