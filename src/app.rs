use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::response_cache::{CacheStats, KvStore, ResponseCache, SqliteKv};
use crate::router::{
  ClientMessage, ClientRegistry, FetchOutcome, HttpFetcher, Request, ServiceWorker,
  SqliteBuckets,
};
use crate::store::{LocalStore, SyncOperation};
use crate::sync::{
  DrainOutcome, HttpRemote, OfflineRepository, PullOutcome, Resolution, SyncEngine, SyncEvent,
  SyncOptions, SyncStatus,
};

/// Wires the local store, sync engine, cache router and response cache together.
pub struct App {
  engine: Arc<SyncEngine<HttpRemote>>,
  repository: OfflineRepository<HttpRemote>,
  worker: ServiceWorker<HttpFetcher, SqliteBuckets>,
  clients: Arc<ClientRegistry>,
  responses: ResponseCache<Box<dyn KvStore>>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let store = Arc::new(LocalStore::open_at(&config.store_path()?)?);
    let remote = HttpRemote::new(&config.api, Config::get_api_token())?;
    let engine = Arc::new(SyncEngine::new(
      store,
      remote,
      SyncOptions::from(&config.sync),
    )?);

    let clients = Arc::new(ClientRegistry::new());
    let worker = ServiceWorker::new(
      config.router.clone(),
      HttpFetcher::new()?,
      SqliteBuckets::open_at(&config.cache_buckets_path()?)?,
      Arc::clone(&clients),
    )?;

    let kv: Box<dyn KvStore> = Box::new(SqliteKv::open_at(&config.response_cache_path()?)?);
    let responses = ResponseCache::from_config(&config.response_cache, kv);

    Ok(Self {
      repository: OfflineRepository::new(Arc::clone(&engine)),
      engine,
      worker,
      clients,
      responses,
    })
  }

  pub fn repository(&self) -> &OfflineRepository<HttpRemote> {
    &self.repository
  }

  pub fn responses(&self) -> &ResponseCache<Box<dyn KvStore>> {
    &self.responses
  }

  /// Probe the remote, then report the engine state.
  pub async fn status(&self) -> Result<SyncStatus> {
    self.engine.check_connectivity().await?;
    Ok(self.engine.status())
  }

  pub fn pending(&self) -> Result<Vec<SyncOperation>> {
    self.engine.store().pending_operations()
  }

  pub async fn force_sync(&self) -> Result<Option<(DrainOutcome, PullOutcome)>> {
    if !self.engine.check_connectivity().await? {
      warn!("Offline, cannot synchronize now");
      return Ok(None);
    }
    self.engine.force_sync().await.map(Some)
  }

  pub fn resolve(&self, operation_id: &str, resolution: Resolution) -> Result<()> {
    if self.engine.resolve_conflict(operation_id, resolution)? {
      Ok(())
    } else {
      Err(eyre!("No pending operation with id {}", operation_id))
    }
  }

  pub fn resolve_all(&self, resolution: Resolution) -> Result<usize> {
    self.engine.resolve_all_conflicts(resolution)
  }

  /// Classify `url` and serve it through the router.
  pub async fn route(&self, url: &str, html: bool) -> Result<Value> {
    self.worker.start().await?;

    let mut request = Request::get(url)?;
    if html {
      request = request.with_header("accept", "text/html");
    }

    let outcome = self.worker.handle_fetch(&request).await;
    self.worker.settle().await;

    Ok(match outcome {
      FetchOutcome::Bypass => json!({ "url": url, "route": "bypass" }),
      FetchOutcome::Respond(served) => json!({
        "url": url,
        "strategy": served.strategy.as_str(),
        "source": format!("{:?}", served.source),
        "status": served.response.status,
        "bytes": served.response.body.len(),
      }),
    })
  }

  pub async fn cache_stats(&self) -> Result<CacheStats> {
    self.responses.stats().await
  }

  pub async fn cache_invalidate(&self, prefix: &str) -> Result<usize> {
    self.responses.invalidate_pattern(prefix).await
  }

  pub async fn cache_clear(&self) -> Result<()> {
    self.responses.clear_all().await
  }

  pub fn export(&self) -> Result<Value> {
    self.engine.store().export()
  }

  /// Run until Ctrl-C: probe connectivity and drain on every tick, react to
  /// worker messages and engine notices.
  pub async fn run_daemon(&self) -> Result<()> {
    let mut events = EventHandler::new(self.engine.options().interval);
    events.listen_for_shutdown();
    events.forward(self.engine.subscribe(), Event::Sync);
    events.forward(self.clients.subscribe(), Event::Client);

    if let Err(e) = self.worker.start().await {
      error!(error = %e, "Failed to start cache router");
    }
    info!(
      interval_secs = self.engine.options().interval.as_secs(),
      "Sync daemon started"
    );
    self.on_tick().await;

    while let Some(event) = events.next().await {
      match event {
        Event::Tick => self.on_tick().await,
        Event::Client(message) => self.on_client_message(message).await,
        Event::Sync(notice) => self.on_sync_event(notice).await,
        Event::Shutdown => {
          info!("Shutting down");
          break;
        }
      }
    }

    self.worker.settle().await;
    Ok(())
  }

  async fn on_tick(&self) {
    if let Err(e) = self.engine.tick().await {
      error!(error = %e, "Periodic sync failed");
    }
  }

  async fn drain(&self) {
    if let Err(e) = self.engine.drain().await {
      error!(error = %e, "Sync failed");
    }
  }

  async fn on_client_message(&self, message: ClientMessage) {
    match message {
      ClientMessage::SyncTasks | ClientMessage::SyncIdeas | ClientMessage::SyncPending => {
        self.drain().await
      }
      // Our own completion notice echoed back
      ClientMessage::SyncComplete { .. } => {}
    }
  }

  async fn on_sync_event(&self, notice: SyncEvent) {
    match notice {
      SyncEvent::Completed { succeeded, failed } => {
        self.clients.post_all(ClientMessage::SyncComplete {
          count: succeeded + failed,
        });
      }
      SyncEvent::ConflictDetected {
        operation_id,
        description,
      } => {
        warn!(
          operation = %operation_id,
          "Could not {} after repeated attempts; resolve with `neuroplan-sync resolve`",
          description
        );
      }
      SyncEvent::Invalidate => {
        if let Err(e) = self.engine.pull().await {
          error!(error = %e, "Failed to refresh local state");
        }
      }
      SyncEvent::Online | SyncEvent::Offline | SyncEvent::Pulled { .. } => {}
    }
  }
}
