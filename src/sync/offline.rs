use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{Idea, NewIdea, NewTask, Project, Task};
use crate::store::{generate_offline_id, is_offline_id, OperationKind, StoreName};

use super::engine::SyncEngine;
use super::remote::RemoteApi;

/// Local-first access to domain records.
///
/// Writes land in the local store and the pending queue immediately; the
/// engine replays them once the remote is reachable.
pub struct OfflineRepository<R: RemoteApi> {
  engine: Arc<SyncEngine<R>>,
}

impl<R: RemoteApi> OfflineRepository<R> {
  pub fn new(engine: Arc<SyncEngine<R>>) -> Self {
    Self { engine }
  }

  pub fn create_task_offline(&self, task: NewTask) -> Result<Task> {
    let now = Utc::now().timestamp_millis();
    let task = Task {
      id: generate_offline_id(),
      project_id: task.project_id,
      title: task.title,
      description: task.description,
      task_type: task.task_type,
      status: task.status,
      day_number: task.day_number,
      priority: task.priority,
      effort: task.effort,
      impact: task.impact,
      created_at: now,
      updated_at: now,
      offline: true,
    };

    self.engine.store().put(&task)?;
    self
      .engine
      .enqueue(StoreName::Tasks, OperationKind::Create, to_value(&task)?)?;

    info!(id = task.id, "Created task offline");
    Ok(task)
  }

  pub fn create_idea_offline(&self, idea: NewIdea) -> Result<Idea> {
    let idea = Idea {
      id: generate_offline_id(),
      user_id: idea.user_id,
      content: idea.content,
      project_id: idea.project_id,
      created_at: Utc::now().timestamp_millis(),
      offline: true,
    };

    self.engine.store().put(&idea)?;
    self
      .engine
      .enqueue(StoreName::Ideas, OperationKind::Create, to_value(&idea)?)?;

    info!(id = idea.id, "Created idea offline");
    Ok(idea)
  }

  /// Merge `patch` (camelCase fields) into a cached task.
  ///
  /// A task that only exists locally has its pending create rewritten in
  /// place, so the server never sees a create followed by an update for an
  /// id it does not know. Returns `None` when the task is not cached.
  pub fn update_task_offline(&self, task_id: i64, patch: Value) -> Result<Option<Task>> {
    let store = self.engine.store();
    let Some(mut current) = store.get_value(StoreName::Tasks, task_id)? else {
      debug!(id = task_id, "Task not cached, nothing to update");
      return Ok(None);
    };

    let Value::Object(patch) = patch else {
      return Err(eyre!("Task update must be a JSON object"));
    };
    if let Value::Object(fields) = &mut current {
      for (key, value) in patch {
        // The id is owned by the store, not by callers
        if key != "id" {
          fields.insert(key, value);
        }
      }
      fields.insert("updatedAt".to_string(), json!(Utc::now().timestamp_millis()));
    }

    let task: Task = serde_json::from_value(current.clone())
      .map_err(|e| eyre!("Invalid task update for {}: {}", task_id, e))?;
    store.put(&task)?;

    if is_offline_id(task_id) {
      let pending_create = store.pending_operations()?.into_iter().find(|op| {
        op.store == StoreName::Tasks
          && op.operation == OperationKind::Create
          && op.record_id() == Some(task_id)
      });
      if let Some(op) = pending_create {
        store.update_pending_data(&op.id, &current)?;
      }
    } else {
      self
        .engine
        .enqueue(StoreName::Tasks, OperationKind::Update, current)?;
    }

    info!(id = task_id, "Updated task offline");
    Ok(Some(task))
  }

  pub fn cache_projects(&self, projects: &[Project]) -> Result<()> {
    self.engine.store().put_many(projects)?;
    info!(count = projects.len(), "Cached projects");
    Ok(())
  }

  pub fn cache_tasks(&self, tasks: &[Task]) -> Result<()> {
    self.engine.store().put_many(tasks)?;
    info!(count = tasks.len(), "Cached tasks");
    Ok(())
  }

  pub fn cache_ideas(&self, ideas: &[Idea]) -> Result<()> {
    self.engine.store().put_many(ideas)?;
    info!(count = ideas.len(), "Cached ideas");
    Ok(())
  }

  pub fn cached_projects(&self) -> Result<Vec<Project>> {
    self.engine.store().get_all()
  }

  pub fn cached_tasks_by_project(&self, project_id: i64) -> Result<Vec<Task>> {
    self
      .engine
      .store()
      .get_by_field("projectId", &json!(project_id))
  }

  pub fn cached_ideas(&self) -> Result<Vec<Idea>> {
    self.engine.store().get_all()
  }
}

fn to_value<T: serde::Serialize>(record: &T) -> Result<Value> {
  serde_json::to_value(record).map_err(|e| eyre!("Failed to serialize record: {}", e))
}
