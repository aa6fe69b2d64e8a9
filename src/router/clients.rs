use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

/// Messages posted from the worker to every open page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  SyncTasks,
  SyncIdeas,
  /// Replay the whole pending queue
  SyncPending,
  SyncComplete { count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
  pub id: u64,
  pub url: String,
  pub focused: bool,
  /// Whether the active worker controls this page
  pub controlled: bool,
}

/// Open application pages and the channel used to reach them.
pub struct ClientRegistry {
  windows: Mutex<Vec<ClientWindow>>,
  next_id: AtomicU64,
  messages: broadcast::Sender<ClientMessage>,
}

impl Default for ClientRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl ClientRegistry {
  pub fn new() -> Self {
    let (messages, _) = broadcast::channel(32);
    Self {
      windows: Mutex::new(Vec::new()),
      next_id: AtomicU64::new(1),
      messages,
    }
  }

  fn lock(&self) -> MutexGuard<'_, Vec<ClientWindow>> {
    self.windows.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
    self.messages.subscribe()
  }

  /// Track an already open page. It stays uncontrolled until the next claim.
  pub fn register(&self, url: &str) -> u64 {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self.lock().push(ClientWindow {
      id,
      url: url.to_string(),
      focused: false,
      controlled: false,
    });
    id
  }

  pub fn unregister(&self, id: u64) -> bool {
    let mut windows = self.lock();
    let before = windows.len();
    windows.retain(|w| w.id != id);
    windows.len() != before
  }

  pub fn windows(&self) -> Vec<ClientWindow> {
    self.lock().clone()
  }

  /// Take control of every open page. Returns how many were claimed.
  pub fn claim(&self) -> usize {
    let mut windows = self.lock();
    for window in windows.iter_mut() {
      window.controlled = true;
    }
    windows.len()
  }

  /// Navigate a page to `url` and give it focus.
  pub fn focus(&self, id: u64, url: &str) -> bool {
    let mut windows = self.lock();
    if !windows.iter().any(|w| w.id == id) {
      return false;
    }
    for window in windows.iter_mut() {
      window.focused = window.id == id;
      if window.id == id {
        window.url = url.to_string();
      }
    }
    true
  }

  pub fn open_window(&self, url: &str) -> u64 {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let mut windows = self.lock();
    for window in windows.iter_mut() {
      window.focused = false;
    }
    windows.push(ClientWindow {
      id,
      url: url.to_string(),
      focused: true,
      controlled: true,
    });
    id
  }

  /// Post a message to all listening pages. Returns the number of receivers.
  pub fn post_all(&self, message: ClientMessage) -> usize {
    let receivers = self.messages.send(message.clone()).unwrap_or(0);
    debug!(?message, receivers, "Posted message to clients");
    receivers
  }
}
