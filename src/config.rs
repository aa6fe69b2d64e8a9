use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub sync: SyncConfig,
  pub router: RouterConfig,
  pub response_cache: ResponseCacheConfig,
  pub logging: LoggingConfig,
  /// Where local databases live (defaults to $XDG_DATA_HOME/neuroplan)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3000/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Drain the queue automatically on reconnect and on every interval tick
  pub auto_sync: bool,
  pub interval_secs: u64,
  pub max_retries: u32,
  /// Deadline for a single remote dispatch
  pub dispatch_timeout_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      auto_sync: true,
      interval_secs: 30,
      max_retries: 3,
      dispatch_timeout_secs: 30,
    }
  }
}

impl SyncConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs.max(1))
  }

  pub fn dispatch_timeout(&self) -> Duration {
    Duration::from_secs(self.dispatch_timeout_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
  /// Name of the single live cache bucket; any other bucket is purged on activation
  pub cache_version: String,
  /// Origin the application shell is served from
  pub origin: String,
  /// Path prefixes served network-first
  #[serde(deserialize_with = "deserialize_route_prefixes")]
  pub api_routes: Vec<String>,
  pub offline_url: String,
  /// Assets fetched eagerly on install
  pub precache: Vec<String>,
}

impl Default for RouterConfig {
  fn default() -> Self {
    Self {
      cache_version: "neuroplan-v1".to_string(),
      origin: "http://localhost:3000".to_string(),
      api_routes: vec!["/api/".to_string()],
      offline_url: "/offline.html".to_string(),
      precache: [
        "/",
        "/offline.html",
        "/manifest.json",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
    }
  }
}

fn deserialize_route_prefixes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| {
        let s = s.trim();
        if s.starts_with('/') {
          s.to_string()
        } else {
          format!("/{}", s)
        }
      })
      .collect(),
  )
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResponseCacheConfig {
  /// When disabled every lookup is a miss
  pub enabled: bool,
  pub ttl_secs: u64,
}

impl Default for ResponseCacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_secs: 7 * 24 * 60 * 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter directive, overridden by RUST_LOG
  pub filter: String,
  /// Write daily rolling log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      filter: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./neuroplan.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/neuroplan/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("neuroplan.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("neuroplan").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Get the API token from the environment, if any.
  pub fn get_api_token() -> Option<String> {
    std::env::var("NEUROPLAN_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }

  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("neuroplan"))
  }

  pub fn store_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("offline.db"))
  }

  pub fn cache_buckets_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("worker-cache.db"))
  }

  pub fn response_cache_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("response-cache.db"))
  }
}
