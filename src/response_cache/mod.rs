//! Memoization layer in front of expensive AI generation calls.
//!
//! Results are stored in a [`KvStore`] under a hash of the semantically
//! relevant request input. The cache is a pure optimization: when the backing
//! store fails, lookups degrade to misses and the generator runs as usual.

mod key;
mod kv;

pub use key::{cache_key, CacheNamespace};
pub use kv::{glob_match, KvStore, MemoryKv, NoopKv, SqliteKv};

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ResponseCacheConfig;

use key::normalize_text;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub hit_rate: f64,
  /// Live keys in the backing store
  pub entries: usize,
}

pub struct ResponseCache<K: KvStore> {
  store: K,
  /// Overrides the namespace default when set
  ttl: Option<Duration>,
  hits: AtomicU64,
  misses: AtomicU64,
}

impl ResponseCache<Box<dyn KvStore>> {
  /// Cache backed by `store`, or one that always misses when disabled.
  pub fn from_config(config: &ResponseCacheConfig, store: Box<dyn KvStore>) -> Self {
    let store: Box<dyn KvStore> = if config.enabled { store } else { Box::new(NoopKv) };
    Self::new(store).with_ttl(Duration::from_secs(config.ttl_secs))
  }
}

impl<K: KvStore> ResponseCache<K> {
  pub fn new(store: K) -> Self {
    Self {
      store,
      ttl: None,
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
    }
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }

  fn ttl_for(&self, namespace: CacheNamespace) -> Duration {
    self.ttl.unwrap_or_else(|| namespace.default_ttl())
  }

  /// Return the cached value for `key`, or run `generator` and cache its result.
  ///
  /// Backing store failures are logged and treated as a miss. Generator
  /// errors propagate and nothing is cached.
  pub async fn with_cache<T, F, Fut>(&self, key: &str, generator: F, ttl: Duration) -> Result<T>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    match self.store.get(key).await {
      Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
        Ok(value) => {
          self.hits.fetch_add(1, Ordering::Relaxed);
          debug!(key, "Cache hit");
          return Ok(value);
        }
        Err(e) => warn!(key, error = %e, "Discarding undecodable cache entry"),
      },
      Ok(None) => {}
      Err(e) => warn!(key, error = %e, "Failed to read cache"),
    }

    self.misses.fetch_add(1, Ordering::Relaxed);
    debug!(key, "Cache miss, running generator");
    let result = generator().await?;

    match serde_json::to_string(&result) {
      Ok(raw) => match self.store.setex(key, ttl, &raw).await {
        Ok(()) => debug!(key, ttl_secs = ttl.as_secs(), "Cached result"),
        Err(e) => warn!(key, error = %e, "Failed to write cache"),
      },
      Err(e) => warn!(key, error = %e, "Failed to serialize result for caching"),
    }

    Ok(result)
  }

  pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    self
      .store
      .get(key)
      .await?
      .map(|raw| {
        serde_json::from_str(&raw).map_err(|e| eyre!("Failed to deserialize {}: {}", key, e))
      })
      .transpose()
  }

  pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
    let raw =
      serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize {}: {}", key, e))?;
    self.store.setex(key, ttl, &raw).await
  }

  async fn in_namespace<T, F, Fut>(
    &self,
    namespace: CacheNamespace,
    input: Value,
    generator: F,
  ) -> Result<T>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let key = cache_key(namespace, &input);
    self
      .with_cache(&key, generator, self.ttl_for(namespace))
      .await
  }

  pub async fn cache_charter_analysis<T, F, Fut>(
    &self,
    project_description: &str,
    generator: F,
  ) -> Result<T>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let input = json!({ "description": normalize_text(project_description) });
    self
      .in_namespace(CacheNamespace::Charter, input, generator)
      .await
  }

  pub async fn cache_wbs_generation<T, F, Fut>(
    &self,
    project_description: &str,
    profile: &Value,
    generator: F,
  ) -> Result<T>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let input = json!({
      "description": normalize_text(project_description),
      "profile": profile,
    });
    self.in_namespace(CacheNamespace::Wbs, input, generator).await
  }

  pub async fn cache_task_generation<T, F, Fut>(
    &self,
    deliverable: &Value,
    profile: &Value,
    generator: F,
  ) -> Result<T>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let input = json!({ "deliverable": deliverable, "profile": profile });
    self
      .in_namespace(CacheNamespace::Tasks, input, generator)
      .await
  }

  pub async fn cache_cycle_generation<T, F, Fut>(
    &self,
    project_description: &str,
    profile: &Value,
    generator: F,
  ) -> Result<T>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let input = json!({
      "description": normalize_text(project_description),
      "profile": profile,
    });
    self
      .in_namespace(CacheNamespace::Cycle, input, generator)
      .await
  }

  /// Remove every key starting with `prefix`. Returns the number removed.
  pub async fn invalidate_pattern(&self, prefix: &str) -> Result<usize> {
    let keys = self.store.keys(&format!("{}*", prefix)).await?;
    if keys.is_empty() {
      return Ok(0);
    }

    let removed = self.store.del(&keys).await?;
    info!(prefix, removed, "Cache invalidated");
    Ok(removed)
  }

  pub async fn clear_all(&self) -> Result<()> {
    self.store.flush().await?;
    info!("Response cache cleared");
    Ok(())
  }

  pub async fn stats(&self) -> Result<CacheStats> {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total = hits + misses;

    Ok(CacheStats {
      hits,
      misses,
      hit_rate: if total == 0 {
        0.0
      } else {
        hits as f64 / total as f64
      },
      entries: self.store.keys("*").await?.len(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use pretty_assertions::assert_eq;
  use serde::Deserialize;
  use std::sync::atomic::AtomicUsize;

  /// Backing store that is always unreachable.
  struct UnreachableKv;

  #[async_trait]
  impl KvStore for UnreachableKv {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
      Err(eyre!("connection refused"))
    }

    async fn setex(&self, _key: &str, _ttl: Duration, _value: &str) -> Result<()> {
      Err(eyre!("connection refused"))
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>> {
      Err(eyre!("connection refused"))
    }

    async fn del(&self, _keys: &[String]) -> Result<usize> {
      Err(eyre!("connection refused"))
    }

    async fn flush(&self) -> Result<()> {
      Err(eyre!("connection refused"))
    }
  }

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Charter {
    goal: String,
    risks: Vec<String>,
    score: f64,
  }

  fn charter() -> Charter {
    Charter {
      goal: "Ship the beta".to_string(),
      risks: vec!["scope".to_string(), "time".to_string()],
      score: 0.75,
    }
  }

  #[tokio::test]
  async fn test_second_call_skips_generator() {
    let cache = ResponseCache::new(MemoryKv::new());
    let calls = AtomicUsize::new(0);
    let generate = || async {
      calls.fetch_add(1, Ordering::SeqCst);
      Ok(charter())
    };

    let first: Charter = cache
      .with_cache("charter:x", generate, Duration::from_secs(60))
      .await
      .unwrap();
    let second: Charter = cache
      .with_cache("charter:x", generate, Duration::from_secs(60))
      .await
      .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);

    let stats = cache.stats().await.unwrap();
    assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    assert_eq!(stats.hit_rate, 0.5);
  }

  #[tokio::test]
  async fn test_set_then_get_round_trips() {
    let cache = ResponseCache::new(SqliteKv::open_in_memory().unwrap());
    cache
      .set("wbs:1", &charter(), Duration::from_secs(60))
      .await
      .unwrap();

    let loaded: Option<Charter> = cache.get("wbs:1").await.unwrap();
    assert_eq!(loaded, Some(charter()));
    assert_eq!(cache.get::<Charter>("wbs:2").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_unreachable_store_degrades_to_miss() {
    let cache = ResponseCache::new(UnreachableKv);
    let calls = AtomicUsize::new(0);

    for _ in 0..2 {
      let result: Charter = cache
        .cache_charter_analysis("Ship the beta", || async {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(charter())
        })
        .await
        .unwrap();
      assert_eq!(result, charter());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_generator_error_propagates_and_is_not_cached() {
    let cache = ResponseCache::new(MemoryKv::new());

    let failed: Result<Charter> = cache
      .with_cache("k", || async { Err(eyre!("model overloaded")) }, Duration::from_secs(60))
      .await;
    assert!(failed.is_err());
    assert!(cache.get::<Charter>("k").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_expired_entry_regenerates() {
    let cache = ResponseCache::new(MemoryKv::new());
    let calls = AtomicUsize::new(0);
    let generate = || async {
      calls.fetch_add(1, Ordering::SeqCst);
      Ok(1u32)
    };

    cache
      .with_cache("cycle:x", generate, Duration::from_millis(20))
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    cache
      .with_cache("cycle:x", generate, Duration::from_millis(20))
      .await
      .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_typed_helpers_share_semantic_keys() {
    let cache = ResponseCache::new(MemoryKv::new());
    let profile = json!({ "energy": "low", "focusMinutes": 25 });
    let reordered = json!({ "focusMinutes": 25, "energy": "low" });
    let calls = AtomicUsize::new(0);

    for (description, profile) in [("Plan launch", &profile), ("  Plan launch\n", &reordered)] {
      let _: Vec<String> = cache
        .cache_wbs_generation(description, profile, || async {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(vec!["deliverable".to_string()])
        })
        .await
        .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Same input in another namespace is a separate entry
    let _: Vec<String> = cache
      .cache_cycle_generation("Plan launch", &profile, || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![])
      })
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_invalidate_pattern_and_clear() {
    let cache = ResponseCache::new(MemoryKv::new());
    let ttl = Duration::from_secs(60);
    for key in ["charter:a", "charter:b", "tasks:a"] {
      cache.set(key, &1, ttl).await.unwrap();
    }

    assert_eq!(cache.invalidate_pattern("charter:").await.unwrap(), 2);
    assert_eq!(cache.invalidate_pattern("wbs:").await.unwrap(), 0);
    assert_eq!(cache.stats().await.unwrap().entries, 1);

    cache.clear_all().await.unwrap();
    assert_eq!(cache.stats().await.unwrap().entries, 0);
  }

  #[tokio::test]
  async fn test_disabled_cache_always_misses() {
    let config = ResponseCacheConfig {
      enabled: false,
      ..ResponseCacheConfig::default()
    };
    let cache = ResponseCache::from_config(&config, Box::new(MemoryKv::new()));
    let calls = AtomicUsize::new(0);

    for _ in 0..2 {
      let _: u8 = cache
        .cache_task_generation(&json!({ "title": "d" }), &json!({}), || async {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(1)
        })
        .await
        .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}
