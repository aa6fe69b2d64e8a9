//! Request interception for the application shell.
//!
//! The worker owns a single versioned bucket. Every GET from a controlled
//! page is classified by [`RouteTable`] and satisfied by one of four
//! strategies; failures are absorbed into cached or synthetic responses and
//! never surface as errors to the page.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::RouterConfig;

use super::bucket::BucketStorage;
use super::clients::{ClientMessage, ClientRegistry};
use super::fetch::Fetcher;
use super::request::{Request, Response};
use super::strategy::{CacheStrategy, Route, RouteTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  /// Installed and waiting for activation
  Installed,
  Activating,
  Activated,
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
  /// The pre-cached offline page, served in place of a navigation
  OfflineFallback,
  /// Generated locally because neither network nor cache could answer
  Synthetic,
}

#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  pub strategy: CacheStrategy,
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Not intercepted; the page talks to the network directly
  Bypass,
  Respond(Served),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecacheReport {
  pub cached: Vec<String>,
  pub failed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  pub purged: Vec<String>,
  pub claimed: usize,
}

/// Messages posted from a page to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  SkipWaiting,
  CacheUrls { urls: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// A notification ready to be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: Value,
  pub actions: Vec<NotificationAction>,
}

#[derive(Deserialize)]
struct PushPayload {
  title: String,
  body: String,
  icon: Option<String>,
  data: Option<Value>,
  #[serde(default)]
  actions: Vec<NotificationAction>,
}

const DEFAULT_TITLE: &str = "NeuroPlan";
const DEFAULT_BODY: &str = "Você tem tarefas pendentes!";
const DEFAULT_ICON: &str = "/icons/icon-192x192.png";
const BADGE_ICON: &str = "/icons/icon-72x72.png";
const VIBRATE_PATTERN: [u32; 3] = [100, 50, 100];
const DEFAULT_CLICK_URL: &str = "/dashboard";

impl Notification {
  /// Build a notification from a push payload, falling back to the default
  /// reminder when the payload is missing or malformed.
  pub fn from_push(payload: Option<&[u8]>) -> Self {
    let parsed = payload.and_then(|bytes| match serde_json::from_slice::<PushPayload>(bytes) {
      Ok(p) => Some(p),
      Err(e) => {
        warn!(error = %e, "Malformed push payload, showing default notification");
        None
      }
    });

    let payload = parsed.unwrap_or_else(|| PushPayload {
      title: DEFAULT_TITLE.to_string(),
      body: DEFAULT_BODY.to_string(),
      icon: None,
      data: None,
      actions: Vec::new(),
    });

    Self {
      title: payload.title,
      body: payload.body,
      icon: payload.icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
      badge: BADGE_ICON.to_string(),
      vibrate: VIBRATE_PATTERN.to_vec(),
      data: payload.data.unwrap_or_else(|| json!({})),
      actions: payload.actions,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
  /// An existing same-origin page was navigated and focused
  Focused(u64),
  Opened(u64),
}

pub struct ServiceWorker<F: Fetcher, S: BucketStorage> {
  config: RouterConfig,
  routes: RouteTable,
  origin: Url,
  fetcher: Arc<F>,
  buckets: Arc<S>,
  clients: Arc<ClientRegistry>,
  state: Mutex<WorkerState>,
  skip_waiting: AtomicBool,
  background: Mutex<JoinSet<()>>,
}

impl<F: Fetcher, S: BucketStorage> ServiceWorker<F, S> {
  pub fn new(
    config: RouterConfig,
    fetcher: F,
    buckets: S,
    clients: Arc<ClientRegistry>,
  ) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid router origin {}: {}", config.origin, e))?;

    Ok(Self {
      routes: RouteTable::from_config(&config),
      config,
      origin,
      fetcher: Arc::new(fetcher),
      buckets: Arc::new(buckets),
      clients,
      state: Mutex::new(WorkerState::Parsed),
      skip_waiting: AtomicBool::new(false),
      background: Mutex::new(JoinSet::new()),
    })
  }

  pub fn state(&self) -> WorkerState {
    *self.lock_state()
  }

  pub fn cache_version(&self) -> &str {
    &self.config.cache_version
  }

  pub fn routes(&self) -> &RouteTable {
    &self.routes
  }

  pub fn buckets(&self) -> &S {
    &self.buckets
  }

  fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, state: WorkerState) {
    *self.lock_state() = state;
  }

  fn resolve(&self, url: &str) -> Result<Url> {
    self
      .origin
      .join(url)
      .map_err(|e| eyre!("Invalid URL {}: {}", url, e))
  }

  /// Install, then activate immediately if skip-waiting was requested.
  pub async fn start(&self) -> Result<PrecacheReport> {
    let report = self.install().await?;
    if self.skip_waiting.load(Ordering::SeqCst) {
      self.activate()?;
    }
    Ok(report)
  }

  /// Precache the application shell. Precache failures are logged and never
  /// block installation.
  pub async fn install(&self) -> Result<PrecacheReport> {
    info!(version = %self.config.cache_version, "Installing service worker");
    self.set_state(WorkerState::Installing);

    self.buckets.open_bucket(&self.config.cache_version)?;
    let report = self.add_all(&self.config.precache).await;

    if report.failed.is_empty() {
      info!(assets = report.cached.len(), "Precaching complete");
    } else {
      error!(failed = ?report.failed, "Precaching failed");
    }

    self.set_state(WorkerState::Installed);
    self.skip_waiting.store(true, Ordering::SeqCst);

    Ok(report)
  }

  /// Purge every bucket except the current version and claim open pages.
  pub fn activate(&self) -> Result<ActivationReport> {
    info!("Activating service worker");
    self.set_state(WorkerState::Activating);

    let mut purged = Vec::new();
    for name in self.buckets.bucket_names()? {
      if name != self.config.cache_version {
        info!(bucket = %name, "Deleting old cache");
        self.buckets.delete_bucket(&name)?;
        purged.push(name);
      }
    }

    let claimed = self.clients.claim();
    debug!(claimed, "Claimed clients");
    self.set_state(WorkerState::Activated);

    Ok(ActivationReport { purged, claimed })
  }

  async fn add_all(&self, urls: &[String]) -> PrecacheReport {
    let results = join_all(urls.iter().map(|url| async move { (url, self.add(url).await) })).await;

    let mut report = PrecacheReport::default();
    for (url, result) in results {
      match result {
        Ok(()) => report.cached.push(url.clone()),
        Err(e) => {
          warn!(url = %url, error = %e, "Failed to cache asset");
          report.failed.push(url.clone());
        }
      }
    }
    report
  }

  async fn add(&self, url: &str) -> Result<()> {
    let request = Request::get(self.resolve(url)?.as_str())?;
    let response = self.fetcher.fetch(&request).await?;
    if !response.is_success() {
      return Err(eyre!("Unexpected status {} for {}", response.status, request.url));
    }
    self
      .buckets
      .put(&self.config.cache_version, &request.cache_key(), &response)
  }

  pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
    if self.state() != WorkerState::Activated {
      return FetchOutcome::Bypass;
    }

    let strategy = match self.routes.classify(request) {
      Route::Bypass => return FetchOutcome::Bypass,
      Route::Strategy(strategy) => strategy,
    };
    debug!(url = %request.url, %strategy, "Routing request");

    let (response, source) = match strategy {
      CacheStrategy::NetworkFirst => self.network_first(request).await,
      CacheStrategy::CacheFirst => self.cache_first(request).await,
      CacheStrategy::NetworkFirstWithOfflineFallback => {
        self.network_first_with_offline_fallback(request).await
      }
      CacheStrategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
    };

    FetchOutcome::Respond(Served {
      response,
      source,
      strategy,
    })
  }

  async fn network_first(&self, request: &Request) -> (Response, ResponseSource) {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        self.store(request, &response);
        (response, ResponseSource::Network)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network first falling back to cache");
        match self.lookup(&request.cache_key()) {
          Some(cached) => (cached, ResponseSource::Cache),
          None => (Response::offline_json(), ResponseSource::Synthetic),
        }
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> (Response, ResponseSource) {
    if let Some(cached) = self.lookup(&request.cache_key()) {
      return (cached, ResponseSource::Cache);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        self.store(request, &response);
        (response, ResponseSource::Network)
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "Cache first failed");
        (Response::offline_text(), ResponseSource::Synthetic)
      }
    }
  }

  async fn network_first_with_offline_fallback(
    &self,
    request: &Request,
  ) -> (Response, ResponseSource) {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        self.store(request, &response);
        (response, ResponseSource::Network)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Serving offline page");
        if let Some(cached) = self.lookup(&request.cache_key()) {
          return (cached, ResponseSource::Cache);
        }

        let offline_page = self
          .resolve(&self.config.offline_url)
          .ok()
          .and_then(|url| self.lookup(url.as_str()));
        match offline_page {
          Some(page) => (page, ResponseSource::OfflineFallback),
          None => (Response::offline_text(), ResponseSource::Synthetic),
        }
      }
    }
  }

  async fn stale_while_revalidate(&self, request: &Request) -> (Response, ResponseSource) {
    if let Some(cached) = self.lookup(&request.cache_key()) {
      self.revalidate(request.clone());
      return (cached, ResponseSource::Cache);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        self.store(request, &response);
        (response, ResponseSource::Network)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Nothing cached and network unavailable");
        (Response::offline_text(), ResponseSource::Synthetic)
      }
    }
  }

  /// Refresh the bucket entry for `request` in the background.
  fn revalidate(&self, request: Request) {
    let fetcher = Arc::clone(&self.fetcher);
    let buckets = Arc::clone(&self.buckets);
    let bucket = self.config.cache_version.clone();

    self
      .background
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .spawn(async move {
        match fetcher.fetch(&request).await {
          Ok(response) if response.is_success() => {
            if let Err(e) = buckets.put(&bucket, &request.cache_key(), &response) {
              warn!(url = %request.url, error = %e, "Failed to refresh cache entry");
            }
          }
          Ok(response) => {
            debug!(url = %request.url, status = response.status, "Revalidation not cached");
          }
          Err(e) => debug!(url = %request.url, error = %e, "Revalidation failed"),
        }
      });
  }

  /// Wait for all background revalidations spawned so far.
  pub async fn settle(&self) {
    let mut tasks = std::mem::take(&mut *self.background.lock().unwrap_or_else(|e| e.into_inner()));
    while let Some(result) = tasks.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "Background revalidation panicked");
      }
    }
  }

  /// Only successful responses are written; write failures are logged.
  fn store(&self, request: &Request, response: &Response) {
    if !response.is_success() {
      return;
    }
    if let Err(e) = self
      .buckets
      .put(&self.config.cache_version, &request.cache_key(), response)
    {
      warn!(url = %request.url, error = %e, "Failed to cache response");
    }
  }

  fn lookup(&self, url: &str) -> Option<Response> {
    match self.buckets.match_url(&self.config.cache_version, url) {
      Ok(cached) => cached.map(|c| c.response),
      Err(e) => {
        warn!(url, error = %e, "Cache lookup failed");
        None
      }
    }
  }

  /// Forward a background-sync tag to open pages.
  pub fn handle_sync(&self, tag: &str) -> Option<ClientMessage> {
    let message = match tag {
      "sync-tasks" => ClientMessage::SyncTasks,
      "sync-ideas" => ClientMessage::SyncIdeas,
      "sync-pending-operations" | "sync-check" => ClientMessage::SyncPending,
      other => {
        debug!(tag = other, "Ignoring unknown sync tag");
        return None;
      }
    };

    info!(tag, "Background sync");
    self.clients.post_all(message.clone());
    Some(message)
  }

  pub fn handle_push(&self, payload: Option<&[u8]>) -> Notification {
    let notification = Notification::from_push(payload);
    info!(title = %notification.title, "Push received");
    notification
  }

  /// Focus a same-origin page at the notification's target, or open one.
  pub fn handle_notification_click(&self, data: &Value) -> Result<ClickOutcome> {
    let target = data
      .get("url")
      .and_then(Value::as_str)
      .unwrap_or(DEFAULT_CLICK_URL);
    let target = self.resolve(target)?;
    let origin = self.origin.origin().ascii_serialization();

    let existing = self
      .clients
      .windows()
      .into_iter()
      .find(|w| w.url.starts_with(&origin));

    match existing {
      Some(window) => {
        self.clients.focus(window.id, target.as_str());
        Ok(ClickOutcome::Focused(window.id))
      }
      None => Ok(ClickOutcome::Opened(self.clients.open_window(target.as_str()))),
    }
  }

  pub async fn handle_message(&self, message: WorkerMessage) -> Result<Option<PrecacheReport>> {
    debug!(?message, "Message received");

    match message {
      WorkerMessage::SkipWaiting => {
        self.skip_waiting.store(true, Ordering::SeqCst);
        if self.state() == WorkerState::Installed {
          self.activate()?;
        }
        Ok(None)
      }
      WorkerMessage::CacheUrls { urls } => Ok(Some(self.add_all(&urls).await)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::router::bucket::SqliteBuckets;
  use async_trait::async_trait;
  use pretty_assertions::assert_eq;
  use std::collections::HashMap;
  use std::time::Duration;

  const ORIGIN: &str = "http://localhost:3000";

  /// Network stand-in serving canned responses by URL.
  #[derive(Default)]
  struct FakeFetcher {
    responses: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
  }

  impl FakeFetcher {
    fn serve(&self, path: &str, response: Response) {
      self
        .responses
        .lock()
        .unwrap()
        .insert(format!("{}{}", ORIGIN, path), response);
    }

    fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
      self.calls.lock().unwrap().len()
    }
  }

  #[async_trait]
  impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
      self.calls.lock().unwrap().push(request.url.to_string());
      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("network unreachable"));
      }
      Ok(
        self
          .responses
          .lock()
          .unwrap()
          .get(request.url.as_str())
          .cloned()
          .unwrap_or_else(|| Response::new(404, "not found")),
      )
    }
  }

  fn shell_fetcher() -> FakeFetcher {
    let fetcher = FakeFetcher::default();
    for path in RouterConfig::default().precache {
      fetcher.serve(&path, Response::new(200, format!("asset {}", path)));
    }
    fetcher.serve("/offline.html", Response::new(200, "offline page"));
    fetcher
  }

  async fn started(fetcher: FakeFetcher) -> ServiceWorker<FakeFetcher, SqliteBuckets> {
    let worker = ServiceWorker::new(
      RouterConfig::default(),
      fetcher,
      SqliteBuckets::open_in_memory().unwrap(),
      Arc::new(ClientRegistry::new()),
    )
    .unwrap();
    worker.start().await.unwrap();
    worker
  }

  fn url(path: &str) -> String {
    format!("{}{}", ORIGIN, path)
  }

  fn served(outcome: FetchOutcome) -> Served {
    match outcome {
      FetchOutcome::Respond(served) => served,
      FetchOutcome::Bypass => panic!("request was not intercepted"),
    }
  }

  #[tokio::test]
  async fn test_install_precaches_and_activates() {
    let buckets = SqliteBuckets::open_in_memory().unwrap();
    buckets.put("neuroplan-v0", "http://old/x", &Response::new(200, "x")).unwrap();
    let clients = Arc::new(ClientRegistry::new());
    clients.register(&url("/dashboard"));

    let worker =
      ServiceWorker::new(RouterConfig::default(), shell_fetcher(), buckets, Arc::clone(&clients))
        .unwrap();
    let report = worker.install().await.unwrap();
    assert_eq!(worker.state(), WorkerState::Installed);
    assert!(report.failed.is_empty());
    assert_eq!(report.cached.len(), 5);

    let activation = worker.activate().unwrap();
    assert_eq!(activation.purged, vec!["neuroplan-v0"]);
    assert_eq!(activation.claimed, 1);
    assert_eq!(worker.state(), WorkerState::Activated);
    assert_eq!(worker.buckets().bucket_names().unwrap(), vec!["neuroplan-v1"]);
    assert!(clients.windows()[0].controlled);
  }

  #[tokio::test]
  async fn test_precache_failure_does_not_block_install() {
    let fetcher = FakeFetcher::default();
    fetcher.serve("/", Response::new(200, "shell"));
    let worker = started(fetcher).await;

    assert_eq!(worker.state(), WorkerState::Activated);
    assert_eq!(worker.buckets().entry_count("neuroplan-v1").unwrap(), 1);
  }

  #[tokio::test]
  async fn test_fetch_before_activation_bypasses() {
    let worker = ServiceWorker::new(
      RouterConfig::default(),
      shell_fetcher(),
      SqliteBuckets::open_in_memory().unwrap(),
      Arc::new(ClientRegistry::new()),
    )
    .unwrap();

    let request = Request::get(&url("/bundle.js")).unwrap();
    assert!(matches!(worker.handle_fetch(&request).await, FetchOutcome::Bypass));
  }

  #[tokio::test]
  async fn test_network_first_serves_cache_when_offline() {
    let fetcher = shell_fetcher();
    fetcher.serve("/api/trpc/tasks.list", Response::new(200, "[1,2]"));
    let worker = started(fetcher).await;
    let request = Request::get(&url("/api/trpc/tasks.list")).unwrap();

    let online = served(worker.handle_fetch(&request).await);
    assert_eq!(online.source, ResponseSource::Network);
    assert_eq!(online.strategy, CacheStrategy::NetworkFirst);

    worker.fetcher.set_offline(true);
    let offline = served(worker.handle_fetch(&request).await);
    assert_eq!(offline.source, ResponseSource::Cache);
    assert_eq!(offline.response.body_text(), "[1,2]");
  }

  #[tokio::test]
  async fn test_network_first_without_cache_is_degraded_json() {
    let worker = started(shell_fetcher()).await;
    worker.fetcher.set_offline(true);

    let request = Request::get(&url("/api/trpc/ideas.list")).unwrap();
    let served = served(worker.handle_fetch(&request).await);

    assert_eq!(served.source, ResponseSource::Synthetic);
    assert_eq!(served.response, Response::offline_json());
  }

  #[tokio::test]
  async fn test_cache_first_skips_network_on_hit() {
    let worker = started(shell_fetcher()).await;
    let calls = worker.fetcher.calls();

    let request = Request::get(&url("/icons/icon-192x192.png")).unwrap();
    let served = served(worker.handle_fetch(&request).await);

    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(worker.fetcher.calls(), calls);
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_errors() {
    let worker = started(shell_fetcher()).await;
    let request = Request::get(&url("/missing.css")).unwrap();

    let first = served(worker.handle_fetch(&request).await);
    assert_eq!(first.response.status, 404);
    assert_eq!(first.source, ResponseSource::Network);

    worker.fetcher.set_offline(true);
    let second = served(worker.handle_fetch(&request).await);
    assert_eq!(second.response, Response::offline_text());
  }

  #[tokio::test]
  async fn test_navigation_falls_back_to_offline_page() {
    let worker = started(shell_fetcher()).await;
    worker.fetcher.set_offline(true);

    let request = Request::get(&url("/projects/7"))
      .unwrap()
      .with_header("accept", "text/html");
    let served = served(worker.handle_fetch(&request).await);

    assert_eq!(served.strategy, CacheStrategy::NetworkFirstWithOfflineFallback);
    assert_eq!(served.source, ResponseSource::OfflineFallback);
    assert_eq!(served.response.body_text(), "offline page");
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_refreshes_in_background() {
    let fetcher = shell_fetcher();
    fetcher.serve("/data", Response::new(200, "v1"));
    let worker = started(fetcher).await;
    let request = Request::get(&url("/data")).unwrap();

    let first = served(worker.handle_fetch(&request).await);
    assert_eq!(first.source, ResponseSource::Network);

    worker.fetcher.serve("/data", Response::new(200, "v2"));
    let stale = served(worker.handle_fetch(&request).await);
    assert_eq!(stale.source, ResponseSource::Cache);
    assert_eq!(stale.response.body_text(), "v1");

    tokio::time::timeout(Duration::from_secs(5), worker.settle())
      .await
      .unwrap();
    let fresh = served(worker.handle_fetch(&request).await);
    assert_eq!(fresh.response.body_text(), "v2");
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_offline_without_cache() {
    let worker = started(shell_fetcher()).await;
    worker.fetcher.set_offline(true);

    let request = Request::get(&url("/data")).unwrap();
    let served = served(worker.handle_fetch(&request).await);
    assert_eq!(served.source, ResponseSource::Synthetic);
    assert_eq!(served.response.status, 503);
  }

  #[tokio::test]
  async fn test_sync_tags_are_broadcast() {
    let worker = started(shell_fetcher()).await;
    let mut messages = worker.clients.subscribe();

    assert_eq!(worker.handle_sync("sync-tasks"), Some(ClientMessage::SyncTasks));
    assert_eq!(worker.handle_sync("sync-ideas"), Some(ClientMessage::SyncIdeas));
    assert_eq!(worker.handle_sync("unknown"), None);

    assert_eq!(messages.recv().await.unwrap(), ClientMessage::SyncTasks);
    assert_eq!(messages.recv().await.unwrap(), ClientMessage::SyncIdeas);
  }

  #[test]
  fn test_push_payloads() {
    let default = Notification::from_push(Some(b"not json"));
    assert_eq!(default.title, "NeuroPlan");
    assert_eq!(default.body, "Você tem tarefas pendentes!");
    assert_eq!(default.badge, "/icons/icon-72x72.png");
    assert_eq!(default.vibrate, vec![100, 50, 100]);
    assert_eq!(default.data, json!({}));

    let custom = Notification::from_push(Some(
      br#"{"title":"Focus","body":"Start your block","data":{"url":"/focus"},"actions":[{"action":"open","title":"Open"}]}"#,
    ));
    assert_eq!(custom.title, "Focus");
    assert_eq!(custom.icon, "/icons/icon-192x192.png");
    assert_eq!(custom.data, json!({ "url": "/focus" }));
    assert_eq!(custom.actions.len(), 1);

    assert_eq!(Notification::from_push(None).title, "NeuroPlan");
  }

  #[tokio::test]
  async fn test_notification_click_focuses_or_opens() {
    let worker = started(shell_fetcher()).await;

    let opened = worker.handle_notification_click(&json!({})).unwrap();
    let ClickOutcome::Opened(id) = opened else {
      panic!("expected a new window");
    };
    assert_eq!(worker.clients.windows()[0].url, url("/dashboard"));

    let focused = worker
      .handle_notification_click(&json!({ "url": "/tasks" }))
      .unwrap();
    assert_eq!(focused, ClickOutcome::Focused(id));
    assert_eq!(worker.clients.windows()[0].url, url("/tasks"));
  }

  #[tokio::test]
  async fn test_messages() {
    let worker = ServiceWorker::new(
      RouterConfig::default(),
      shell_fetcher(),
      SqliteBuckets::open_in_memory().unwrap(),
      Arc::new(ClientRegistry::new()),
    )
    .unwrap();
    worker.install().await.unwrap();

    let message: WorkerMessage = serde_json::from_value(json!({ "type": "SKIP_WAITING" })).unwrap();
    worker.handle_message(message).await.unwrap();
    assert_eq!(worker.state(), WorkerState::Activated);

    worker.fetcher.serve("/extra.css", Response::new(200, "body{}"));
    let message: WorkerMessage =
      serde_json::from_value(json!({ "type": "CACHE_URLS", "urls": ["/extra.css", "/nope.css"] }))
        .unwrap();
    let report = worker.handle_message(message).await.unwrap().unwrap();
    assert_eq!(report.cached, vec!["/extra.css"]);
    assert_eq!(report.failed, vec!["/nope.css"]);
  }
}
