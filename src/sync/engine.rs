//! Sync engine that replays the pending queue against the remote API.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::store::{is_offline_id, LocalStore, OperationKind, StoreName, SyncOperation};

use super::remote::{RemoteAck, RemoteApi};

#[derive(Debug, Clone)]
pub struct SyncOptions {
  pub auto_sync: bool,
  pub interval: Duration,
  pub max_retries: u32,
  pub dispatch_timeout: Duration,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self::from(&SyncConfig::default())
  }
}

impl From<&SyncConfig> for SyncOptions {
  fn from(config: &SyncConfig) -> Self {
    Self {
      auto_sync: config.auto_sync,
      interval: config.interval(),
      max_retries: config.max_retries,
      dispatch_timeout: config.dispatch_timeout(),
    }
  }
}

/// Snapshot of the engine state, for status displays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
  pub is_online: bool,
  pub is_syncing: bool,
  pub pending_count: usize,
  pub last_sync_at: Option<DateTime<Utc>>,
  pub has_conflicts: bool,
}

/// Notices published to subscribers (toasts in a UI, log lines in the daemon).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
  Online,
  Offline,
  /// A drain finished with at least one operation attempted
  Completed { succeeded: usize, failed: usize },
  /// An operation exhausted its retries and needs manual resolution
  ConflictDetected { operation_id: String, description: String },
  /// Cached query results are stale and should be re-fetched
  Invalidate,
  Pulled { records: usize, failed_stores: usize },
}

/// Result of a drain request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
  Offline,
  /// Another drain was in flight; this trigger was dropped
  AlreadyRunning,
  Completed(DrainReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub succeeded: usize,
  pub failed: usize,
  /// Operations that are at or past the retry cap after this drain
  pub conflicts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
  Offline,
  Pulled { records: usize, failed_stores: usize },
}

/// How to settle an operation that exhausted its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
  /// Keep the local change and retry it from scratch
  KeepLocal,
  /// Drop the local change in favour of the server state
  KeepServer,
}

/// Reconciles locally queued mutations with the remote API.
///
/// At most one drain runs at a time: the drain lock is taken with `try_lock`,
/// so a trigger that arrives while a drain is in flight is dropped rather than
/// queued.
pub struct SyncEngine<R: RemoteApi> {
  store: Arc<LocalStore>,
  remote: R,
  options: SyncOptions,
  drain_lock: tokio::sync::Mutex<()>,
  status: Mutex<SyncStatus>,
  events: broadcast::Sender<SyncEvent>,
}

impl<R: RemoteApi> SyncEngine<R> {
  pub fn new(store: Arc<LocalStore>, remote: R, options: SyncOptions) -> Result<Self> {
    let (events, _) = broadcast::channel(64);

    let engine = Self {
      store,
      remote,
      options,
      drain_lock: tokio::sync::Mutex::new(()),
      status: Mutex::new(SyncStatus {
        is_online: true,
        ..SyncStatus::default()
      }),
      events,
    };
    engine.refresh_counts()?;

    Ok(engine)
  }

  pub fn options(&self) -> &SyncOptions {
    &self.options
  }

  pub fn store(&self) -> &Arc<LocalStore> {
    &self.store
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.events.subscribe()
  }

  pub fn status(&self) -> SyncStatus {
    self.lock_status().clone()
  }

  pub fn is_online(&self) -> bool {
    self.lock_status().is_online
  }

  fn lock_status(&self) -> std::sync::MutexGuard<'_, SyncStatus> {
    // Status is plain data; a panic mid-update cannot leave it inconsistent
    self.status.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn publish(&self, event: SyncEvent) {
    // No subscribers is fine
    let _ = self.events.send(event);
  }

  /// Recompute pending count and the conflict flag from the queue.
  fn refresh_counts(&self) -> Result<()> {
    let pending = self.store.pending_operations()?;
    let max_retries = self.options.max_retries;
    let has_conflicts = pending.iter().any(|op| !op.should_retry(max_retries));

    let mut status = self.lock_status();
    status.pending_count = pending.len();
    status.has_conflicts = has_conflicts;
    Ok(())
  }

  /// Queue a mutation. Succeeds regardless of connectivity.
  pub fn enqueue(&self, store: StoreName, operation: OperationKind, data: Value) -> Result<SyncOperation> {
    let op = self.store.add_pending(store, operation, data)?;
    debug!(operation = %op.id, "Queued {}", op.describe());
    self.refresh_counts()?;
    Ok(op)
  }

  /// Record a connectivity change. Coming back online triggers a drain when
  /// auto sync is enabled.
  pub async fn set_online(&self, online: bool) -> Result<Option<DrainOutcome>> {
    let was_online = {
      let mut status = self.lock_status();
      std::mem::replace(&mut status.is_online, online)
    };

    match (was_online, online) {
      (false, true) => {
        info!("Connection restored, synchronizing");
        self.publish(SyncEvent::Online);
        if self.options.auto_sync {
          return self.drain().await.map(Some);
        }
      }
      (true, false) => {
        warn!("Connection lost, changes will be kept locally");
        self.publish(SyncEvent::Offline);
      }
      _ => {}
    }

    Ok(None)
  }

  /// Probe the remote and record the result. Returns whether it is reachable.
  pub async fn check_connectivity(&self) -> Result<bool> {
    self.probe().await.map(|(reachable, _)| reachable)
  }

  async fn probe(&self) -> Result<(bool, Option<DrainOutcome>)> {
    let reachable = matches!(
      tokio::time::timeout(self.options.dispatch_timeout, self.remote.health()).await,
      Ok(Ok(()))
    );
    let drained = self.set_online(reachable).await?;
    Ok((reachable, drained))
  }

  /// Periodic work: probe connectivity, then drain when online and auto sync
  /// is enabled. A reconnect already drains, so the queue is replayed at most
  /// once per tick.
  pub async fn tick(&self) -> Result<Option<DrainOutcome>> {
    let (reachable, drained) = self.probe().await?;
    if drained.is_some() || !reachable || !self.options.auto_sync {
      return Ok(drained);
    }
    self.drain().await.map(Some)
  }

  /// Replay all pending operations in FIFO order.
  pub async fn drain(&self) -> Result<DrainOutcome> {
    if !self.is_online() {
      debug!("Offline, skipping drain");
      return Ok(DrainOutcome::Offline);
    }

    let Ok(_guard) = self.drain_lock.try_lock() else {
      debug!("Drain already in flight, dropping trigger");
      return Ok(DrainOutcome::AlreadyRunning);
    };

    self.lock_status().is_syncing = true;
    let result = self.drain_locked().await;

    let mut status = self.lock_status();
    status.is_syncing = false;
    if result.is_ok() {
      status.last_sync_at = Some(Utc::now());
    }
    drop(status);

    result.map(DrainOutcome::Completed)
  }

  async fn drain_locked(&self) -> Result<DrainReport> {
    let pending = self.store.pending_operations()?;
    let mut report = DrainReport::default();

    if pending.is_empty() {
      self.refresh_counts()?;
      return Ok(report);
    }

    info!(count = pending.len(), "Processing pending operations");
    let max_retries = self.options.max_retries;

    let ids: Vec<String> = pending.into_iter().map(|op| op.id).collect();
    for id in ids {
      // Re-read so references rewritten by an earlier create in this batch
      // go out with the server id
      let Some(op) = self.store.get_pending(&id)? else {
        continue;
      };

      match self.dispatch(&op).await {
        Ok(ack) => {
          self.acknowledge(&op, ack)?;
          report.succeeded += 1;
        }
        Err(e) => {
          warn!(operation = %op.id, error = %e, "Failed to sync operation");
          report.failed += 1;

          if op.should_retry(max_retries) {
            let retries = op.retries + 1;
            self.store.update_pending_retries(&op.id, retries)?;

            if retries >= max_retries {
              warn!(operation = %op.id, "Max retries reached, manual resolution required");
              self.publish(SyncEvent::ConflictDetected {
                operation_id: op.id.clone(),
                description: op.describe(),
              });
              report.conflicts.push(op.id);
            }
          } else {
            report.conflicts.push(op.id);
          }
        }
      }
    }

    if report.succeeded > 0 {
      self.publish(SyncEvent::Invalidate);
    }

    self.refresh_counts()?;

    if report.failed == 0 {
      info!(succeeded = report.succeeded, "Changes synchronized");
    } else {
      warn!(
        succeeded = report.succeeded,
        failed = report.failed,
        "Sync finished with pending changes"
      );
    }
    self.publish(SyncEvent::Completed {
      succeeded: report.succeeded,
      failed: report.failed,
    });

    Ok(report)
  }

  /// Dispatch one operation, treating a missed deadline as a transient failure.
  async fn dispatch(&self, op: &SyncOperation) -> Result<RemoteAck> {
    match tokio::time::timeout(self.options.dispatch_timeout, self.remote.dispatch(op)).await {
      Ok(result) => result,
      Err(_) => Err(eyre!(
        "Timed out after {:?} while trying to {}",
        self.options.dispatch_timeout,
        op.describe()
      )),
    }
  }

  fn acknowledge(&self, op: &SyncOperation, ack: RemoteAck) -> Result<()> {
    self.store.remove_pending(&op.id)?;

    if op.operation == OperationKind::Create {
      if let (Some(old_id), Some(new_id)) = (op.record_id(), ack.id) {
        if is_offline_id(old_id) && !is_offline_id(new_id) {
          self.store.rekey(op.store, old_id, new_id)?;
          let rewritten = self.store.rekey_pending_refs(op.store, old_id, new_id)?;
          debug!(store = %op.store, old_id, new_id, rewritten, "Rekeyed offline record");
        }
      }
    }

    debug!(operation = %op.id, "Synced {}", op.describe());
    Ok(())
  }

  /// Fetch authoritative state and overwrite local server-confirmed records.
  /// The pending queue is never touched.
  pub async fn pull(&self) -> Result<PullOutcome> {
    if !self.is_online() {
      warn!("Offline, cannot pull from server");
      return Ok(PullOutcome::Offline);
    }

    // Wait for any in-flight drain so rekeyed records are visible to the server
    let _guard = self.drain_lock.lock().await;
    self.lock_status().is_syncing = true;

    let mut records = 0;
    let mut failed_stores = 0;

    for store in StoreName::ALL {
      let listed =
        tokio::time::timeout(self.options.dispatch_timeout, self.remote.list(store)).await;

      match listed {
        Ok(Ok(items)) => match self.store.replace_confirmed(store, &items) {
          Ok(count) => records += count,
          Err(e) => {
            warn!(store = %store, error = %e, "Failed to store pulled records");
            failed_stores += 1;
          }
        },
        Ok(Err(e)) => {
          warn!(store = %store, error = %e, "Failed to pull from server");
          failed_stores += 1;
        }
        Err(_) => {
          warn!(store = %store, "Timed out pulling from server");
          failed_stores += 1;
        }
      }
    }

    let mut status = self.lock_status();
    status.is_syncing = false;
    status.last_sync_at = Some(Utc::now());
    drop(status);

    info!(records, failed_stores, "Pulled server state");
    self.publish(SyncEvent::Pulled {
      records,
      failed_stores,
    });

    Ok(PullOutcome::Pulled {
      records,
      failed_stores,
    })
  }

  /// Drain, then pull.
  pub async fn force_sync(&self) -> Result<(DrainOutcome, PullOutcome)> {
    let drained = self.drain().await?;
    let pulled = self.pull().await?;
    Ok((drained, pulled))
  }

  /// Operations whose retries are exhausted.
  pub fn conflicts(&self) -> Result<Vec<SyncOperation>> {
    let max_retries = self.options.max_retries;
    Ok(
      self
        .store
        .pending_operations()?
        .into_iter()
        .filter(|op| !op.should_retry(max_retries))
        .collect(),
    )
  }

  /// Settle a conflicted operation. Returns false if no such operation exists.
  pub fn resolve_conflict(&self, operation_id: &str, resolution: Resolution) -> Result<bool> {
    let Some(op) = self.store.get_pending(operation_id)? else {
      return Ok(false);
    };

    match resolution {
      Resolution::KeepLocal => {
        self.store.update_pending_retries(&op.id, 0)?;
        info!(operation = %op.id, "Conflict resolved, keeping local change");
      }
      Resolution::KeepServer => {
        self.store.remove_pending(&op.id)?;
        // A create that never reached the server leaves nothing to keep
        if op.operation == OperationKind::Create {
          if let Some(id) = op.record_id().filter(|id| is_offline_id(*id)) {
            self.store.delete(op.store, id)?;
          }
        }
        info!(operation = %op.id, "Conflict resolved, keeping server state");
      }
    }

    self.refresh_counts()?;
    Ok(true)
  }

  pub fn resolve_all_conflicts(&self, resolution: Resolution) -> Result<usize> {
    let conflicts = self.conflicts()?;
    for op in &conflicts {
      self.resolve_conflict(&op.id, resolution)?;
    }
    Ok(conflicts.len())
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use async_trait::async_trait;
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use std::collections::{HashMap, HashSet};
  use std::sync::atomic::{AtomicI64, Ordering};

  /// In-memory remote that records dispatched operations.
  #[derive(Default)]
  pub(crate) struct FakeRemote {
    pub dispatched: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<SyncOperation>>,
    pub failing: Mutex<HashSet<String>>,
    pub lists: Mutex<HashMap<StoreName, Vec<Value>>>,
    pub delay: Option<Duration>,
    next_id: AtomicI64,
  }

  impl FakeRemote {
    pub fn new() -> Self {
      Self {
        next_id: AtomicI64::new(1000),
        ..Self::default()
      }
    }

    pub fn fail(&self, op_id: &str) {
      self.failing.lock().unwrap().insert(op_id.to_string());
    }

    pub fn heal(&self, op_id: &str) {
      self.failing.lock().unwrap().remove(op_id);
    }

    pub fn dispatched(&self) -> Vec<String> {
      self.dispatched.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl RemoteApi for FakeRemote {
    async fn dispatch(&self, op: &SyncOperation) -> Result<RemoteAck> {
      if let Some(delay) = self.delay {
        tokio::time::sleep(delay).await;
      }
      self.dispatched.lock().unwrap().push(op.id.clone());
      self.sent.lock().unwrap().push(op.clone());
      if self.failing.lock().unwrap().contains(&op.id) {
        return Err(eyre!("network unreachable"));
      }
      // The server has never seen placeholder ids
      if op.operation != OperationKind::Create && op.record_id().is_some_and(is_offline_id) {
        return Err(eyre!("no such record"));
      }
      let id = match op.operation {
        OperationKind::Create => Some(self.next_id.fetch_add(1, Ordering::SeqCst)),
        _ => None,
      };
      Ok(RemoteAck { id })
    }

    async fn list(&self, store: StoreName) -> Result<Vec<Value>> {
      Ok(self.lists.lock().unwrap().get(&store).cloned().unwrap_or_default())
    }

    async fn health(&self) -> Result<()> {
      Ok(())
    }
  }

  fn engine_with(remote: FakeRemote, max_retries: u32) -> SyncEngine<FakeRemote> {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let options = SyncOptions {
      max_retries,
      ..SyncOptions::default()
    };
    SyncEngine::new(store, remote, options).unwrap()
  }

  fn op_at(id: &str, timestamp: i64) -> SyncOperation {
    SyncOperation {
      id: id.to_string(),
      store: StoreName::Ideas,
      operation: OperationKind::Update,
      data: json!({ "id": 1 }),
      timestamp,
      retries: 0,
    }
  }

  #[tokio::test]
  async fn test_drain_processes_in_timestamp_order() {
    let engine = engine_with(FakeRemote::new(), 3);
    for (id, ts) in [("c", 300), ("a", 100), ("b", 200), ("a2", 100)] {
      engine.store.insert_pending(&op_at(id, ts)).unwrap();
    }

    let outcome = engine.drain().await.unwrap();

    assert_eq!(engine.remote.dispatched(), vec!["a", "a2", "b", "c"]);
    assert_eq!(
      outcome,
      DrainOutcome::Completed(DrainReport {
        succeeded: 4,
        failed: 0,
        conflicts: vec![],
      })
    );
    assert_eq!(engine.status().pending_count, 0);
    assert!(engine.status().last_sync_at.is_some());
  }

  #[tokio::test]
  async fn test_failure_does_not_block_siblings() {
    let remote = FakeRemote::new();
    remote.fail("b");
    let engine = engine_with(remote, 3);
    for (id, ts) in [("a", 1), ("b", 2), ("c", 3)] {
      engine.store.insert_pending(&op_at(id, ts)).unwrap();
    }

    engine.drain().await.unwrap();

    let remaining = engine.store.pending_operations().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "b");
    assert_eq!(remaining[0].retries, 1);
  }

  #[tokio::test]
  async fn test_retries_saturate_at_max() {
    let remote = FakeRemote::new();
    remote.fail("x");
    let engine = engine_with(remote, 3);
    engine
      .store
      .insert_pending(&SyncOperation {
        retries: 2,
        ..op_at("x", 1)
      })
      .unwrap();

    engine.drain().await.unwrap();
    let op = engine.store.get_pending("x").unwrap().unwrap();
    assert_eq!(op.retries, 3);
    assert!(!op.should_retry(3));

    // Further failures never push past the cap or delete the operation
    engine.drain().await.unwrap();
    let op = engine.store.get_pending("x").unwrap().unwrap();
    assert_eq!(op.retries, 3);
    assert!(engine.status().has_conflicts);
  }

  #[tokio::test]
  async fn test_three_failures_raise_conflict() {
    let remote = FakeRemote::new();
    remote.fail("x");
    let engine = engine_with(remote, 3);
    let mut events = engine.subscribe();
    engine.store.insert_pending(&op_at("x", 1)).unwrap();

    for expected in 1..=3 {
      engine.drain().await.unwrap();
      let op = engine.store.get_pending("x").unwrap().unwrap();
      assert_eq!(op.retries, expected);
      assert_eq!(engine.status().has_conflicts, expected == 3);
    }

    let op = engine.store.get_pending("x").unwrap().unwrap();
    assert!(!op.should_retry(3));
    assert_eq!(engine.conflicts().unwrap().len(), 1);

    let mut saw_conflict = false;
    while let Ok(event) = events.try_recv() {
      if let SyncEvent::ConflictDetected { operation_id, .. } = event {
        assert_eq!(operation_id, "x");
        saw_conflict = true;
      }
    }
    assert!(saw_conflict);
  }

  #[tokio::test]
  async fn test_dependent_ops_use_server_id_within_one_drain() {
    let engine = engine_with(FakeRemote::new(), 3);
    engine
      .store
      .put_value(StoreName::Tasks, &json!({ "id": -7, "title": "draft", "_offline": true }))
      .unwrap();
    engine
      .store
      .insert_pending(&SyncOperation {
        id: "create".to_string(),
        store: StoreName::Tasks,
        operation: OperationKind::Create,
        data: json!({ "id": -7, "title": "draft", "_offline": true }),
        timestamp: 1,
        retries: 0,
      })
      .unwrap();
    engine
      .store
      .insert_pending(&SyncOperation {
        id: "delete".to_string(),
        store: StoreName::Tasks,
        operation: OperationKind::Delete,
        data: json!(-7),
        timestamp: 2,
        retries: 0,
      })
      .unwrap();

    let outcome = engine.drain().await.unwrap();

    assert_eq!(
      outcome,
      DrainOutcome::Completed(DrainReport {
        succeeded: 2,
        failed: 0,
        conflicts: vec![],
      })
    );
    let sent = engine.remote.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].operation, OperationKind::Delete);
    assert_eq!(sent[1].data, json!(1000));
    assert!(engine.store.pending_operations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_offline_drain_is_noop() {
    let engine = engine_with(FakeRemote::new(), 3);
    engine.store.insert_pending(&op_at("a", 1)).unwrap();
    engine.set_online(false).await.unwrap();

    assert_eq!(engine.drain().await.unwrap(), DrainOutcome::Offline);
    assert!(engine.remote.dispatched().is_empty());
    assert_eq!(engine.pull().await.unwrap(), PullOutcome::Offline);
  }

  #[tokio::test]
  async fn test_reconnect_triggers_drain() {
    let engine = engine_with(FakeRemote::new(), 3);
    engine.set_online(false).await.unwrap();
    engine.store.insert_pending(&op_at("a", 1)).unwrap();

    let outcome = engine.set_online(true).await.unwrap();
    assert!(matches!(outcome, Some(DrainOutcome::Completed(_))));
    assert_eq!(engine.remote.dispatched(), vec!["a"]);
  }

  #[tokio::test]
  async fn test_tick_after_reconnect_drains_once() {
    let remote = FakeRemote::new();
    remote.fail("a");
    let engine = engine_with(remote, 3);
    engine.set_online(false).await.unwrap();
    engine.store.insert_pending(&op_at("a", 1)).unwrap();

    let outcome = engine.tick().await.unwrap();

    assert!(matches!(outcome, Some(DrainOutcome::Completed(_))));
    assert_eq!(engine.remote.dispatched(), vec!["a"]);
    assert_eq!(engine.store.get_pending("a").unwrap().unwrap().retries, 1);

    // Already online: the next tick drains on its own
    engine.tick().await.unwrap();
    assert_eq!(engine.remote.dispatched(), vec!["a", "a"]);
  }

  #[tokio::test]
  async fn test_concurrent_drain_is_dropped() {
    let remote = FakeRemote {
      delay: Some(Duration::from_millis(200)),
      ..FakeRemote::new()
    };
    let engine = Arc::new(engine_with(remote, 3));
    engine.store.insert_pending(&op_at("a", 1)).unwrap();

    let first = tokio::spawn({
      let engine = Arc::clone(&engine);
      async move { engine.drain().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(engine.drain().await.unwrap(), DrainOutcome::AlreadyRunning);
    assert!(engine.status().is_syncing);
    assert!(matches!(
      first.await.unwrap().unwrap(),
      DrainOutcome::Completed(_)
    ));
    assert_eq!(engine.remote.dispatched(), vec!["a"]);
  }

  #[tokio::test]
  async fn test_dispatch_timeout_counts_as_failure() {
    let remote = FakeRemote {
      delay: Some(Duration::from_secs(5)),
      ..FakeRemote::new()
    };
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let options = SyncOptions {
      dispatch_timeout: Duration::from_millis(20),
      ..SyncOptions::default()
    };
    let engine = SyncEngine::new(store, remote, options).unwrap();
    engine.store.insert_pending(&op_at("slow", 1)).unwrap();

    let outcome = engine.drain().await.unwrap();
    assert!(matches!(
      outcome,
      DrainOutcome::Completed(DrainReport { failed: 1, .. })
    ));
    assert_eq!(engine.store.get_pending("slow").unwrap().unwrap().retries, 1);
  }

  #[tokio::test]
  async fn test_success_publishes_invalidation() {
    let engine = engine_with(FakeRemote::new(), 3);
    let mut events = engine.subscribe();
    engine.store.insert_pending(&op_at("a", 1)).unwrap();

    engine.drain().await.unwrap();

    let received: Vec<SyncEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(received.contains(&SyncEvent::Invalidate));
    assert!(received.contains(&SyncEvent::Completed {
      succeeded: 1,
      failed: 0
    }));
  }

  #[tokio::test]
  async fn test_pull_overwrites_confirmed_records_only() {
    let remote = FakeRemote::new();
    remote
      .lists
      .lock()
      .unwrap()
      .insert(StoreName::Ideas, vec![json!({ "id": 7, "content": "server" })]);
    let engine = engine_with(remote, 3);
    engine
      .store
      .put_value(StoreName::Ideas, &json!({ "id": 3, "content": "old" }))
      .unwrap();
    engine
      .store
      .put_value(StoreName::Ideas, &json!({ "id": -3, "content": "local", "_offline": true }))
      .unwrap();
    engine.store.insert_pending(&op_at("q", 1)).unwrap();

    let outcome = engine.pull().await.unwrap();

    assert_eq!(
      outcome,
      PullOutcome::Pulled {
        records: 1,
        failed_stores: 0
      }
    );
    let ids: Vec<i64> = engine
      .store
      .all_values(StoreName::Ideas)
      .unwrap()
      .iter()
      .filter_map(|v| v["id"].as_i64())
      .collect();
    assert_eq!(ids, vec![-3, 7]);
    assert_eq!(engine.store.pending_count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_resolve_conflicts() {
    let remote = FakeRemote::new();
    remote.fail("keep");
    remote.fail("drop");
    let engine = engine_with(remote, 1);
    engine
      .store
      .put_value(StoreName::Tasks, &json!({ "id": -2, "_offline": true }))
      .unwrap();
    engine.store.insert_pending(&op_at("keep", 1)).unwrap();
    engine
      .store
      .insert_pending(&SyncOperation {
        store: StoreName::Tasks,
        operation: OperationKind::Create,
        data: json!({ "id": -2, "_offline": true }),
        ..op_at("drop", 2)
      })
      .unwrap();

    engine.drain().await.unwrap();
    assert_eq!(engine.conflicts().unwrap().len(), 2);

    assert!(engine.resolve_conflict("keep", Resolution::KeepLocal).unwrap());
    assert!(engine.resolve_conflict("drop", Resolution::KeepServer).unwrap());
    assert!(!engine.resolve_conflict("missing", Resolution::KeepServer).unwrap());

    assert_eq!(engine.store.get_pending("keep").unwrap().unwrap().retries, 0);
    assert!(engine.store.get_pending("drop").unwrap().is_none());
    assert!(engine.store.get_value(StoreName::Tasks, -2).unwrap().is_none());
    assert!(!engine.status().has_conflicts);

    engine.remote.heal("keep");
    engine.drain().await.unwrap();
    assert_eq!(engine.status().pending_count, 0);
  }
}
