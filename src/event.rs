use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::warn;

use crate::router::ClientMessage;
use crate::sync::SyncEvent;

/// Daemon events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// Periodic tick for connectivity probes and queue draining
  Tick,
  /// Message the worker posted to open pages
  Client(ClientMessage),
  /// Notice from the sync engine
  Sync(SyncEvent),
  Shutdown,
}

/// Event handler that merges the tick timer and forwarded channels
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let ticks = tx.clone();
    tokio::spawn(async move {
      let mut interval = interval_at(Instant::now() + tick_rate, tick_rate);
      interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
      loop {
        interval.tick().await;
        if ticks.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    Self { tx, rx }
  }

  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Emit `Shutdown` on Ctrl-C.
  pub fn listen_for_shutdown(&self) {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(Event::Shutdown);
      }
    });
  }

  /// Forward every message from a broadcast channel as an event.
  pub fn forward<T, F>(&self, mut source: broadcast::Receiver<T>, wrap: F)
  where
    T: Clone + Send + 'static,
    F: Fn(T) -> Event + Send + 'static,
  {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      loop {
        match source.recv().await {
          Ok(message) => {
            if tx.send(wrap(message)).is_err() {
              break;
            }
          }
          Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "Event forwarder lagged");
          }
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    });
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
