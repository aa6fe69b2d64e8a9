//! Domain records kept in the local store.
//!
//! Field names follow the remote API (camelCase). Records created offline carry
//! `_offline: true` until the server confirms them.

use serde::{Deserialize, Serialize};

use crate::store::{Record, StoreName};

fn is_false(value: &bool) -> bool {
  !*value
}

/// Project summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
  pub id: i64,
  pub user_id: i64,
  pub title: String,
  pub briefing: Option<String>,
  pub status: String,
  /// Length of an execution cycle in days (3 by default)
  pub cycle_days: u32,
  pub current_cycle: u32,
  pub created_at: i64,
  pub updated_at: i64,
  #[serde(rename = "_offline", default, skip_serializing_if = "is_false")]
  pub offline: bool,
}

/// A task inside a cycle day (priority 1..=3 maps to A/B/C)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id: i64,
  pub project_id: i64,
  pub title: String,
  pub description: Option<String>,
  #[serde(rename = "type")]
  pub task_type: String,
  pub status: String,
  pub day_number: u32,
  pub priority: u32,
  pub effort: Option<u32>,
  pub impact: Option<u32>,
  pub created_at: i64,
  pub updated_at: i64,
  #[serde(rename = "_offline", default, skip_serializing_if = "is_false")]
  pub offline: bool,
}

/// Fields supplied by the caller when creating a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
  pub project_id: i64,
  pub title: String,
  pub description: Option<String>,
  #[serde(rename = "type")]
  pub task_type: String,
  pub status: String,
  pub day_number: u32,
  pub priority: u32,
  pub effort: Option<u32>,
  pub impact: Option<u32>,
}

/// Quick idea captured from the ideas panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Idea {
  pub id: i64,
  pub user_id: i64,
  pub content: String,
  pub project_id: Option<i64>,
  pub created_at: i64,
  #[serde(rename = "_offline", default, skip_serializing_if = "is_false")]
  pub offline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIdea {
  pub user_id: i64,
  pub content: String,
  pub project_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSession {
  pub id: i64,
  pub task_id: i64,
  pub started_at: i64,
  pub ended_at: Option<i64>,
  #[serde(rename = "_offline", default, skip_serializing_if = "is_false")]
  pub offline: bool,
}

impl Record for Project {
  fn id(&self) -> i64 {
    self.id
  }

  fn store() -> StoreName {
    StoreName::Projects
  }
}

impl Record for Task {
  fn id(&self) -> i64 {
    self.id
  }

  fn store() -> StoreName {
    StoreName::Tasks
  }
}

impl Record for Idea {
  fn id(&self) -> i64 {
    self.id
  }

  fn store() -> StoreName {
    StoreName::Ideas
  }
}

impl Record for FocusSession {
  fn id(&self) -> i64 {
    self.id
  }

  fn store() -> StoreName {
    StoreName::FocusSessions
  }
}
