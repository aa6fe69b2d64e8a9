use serde::Serialize;
use std::fmt;

use crate::config::RouterConfig;

use super::request::Request;

/// Rules for satisfying a fetch from the bucket versus the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
  NetworkFirst,
  CacheFirst,
  NetworkFirstWithOfflineFallback,
  StaleWhileRevalidate,
}

impl CacheStrategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      CacheStrategy::NetworkFirst => "network-first",
      CacheStrategy::CacheFirst => "cache-first",
      CacheStrategy::NetworkFirstWithOfflineFallback => "network-first-with-offline-fallback",
      CacheStrategy::StaleWhileRevalidate => "stale-while-revalidate",
    }
  }
}

impl fmt::Display for CacheStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

pub const STATIC_EXTENSIONS: &[&str] = &[
  ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2",
];

pub fn is_static_asset(path: &str) -> bool {
  STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Strategy for a path alone, without request headers.
pub fn cache_strategy_for_path(path: &str, is_api_route: bool) -> CacheStrategy {
  if is_api_route {
    CacheStrategy::NetworkFirst
  } else if is_static_asset(path) {
    CacheStrategy::CacheFirst
  } else if path == "/" || path.ends_with(".html") {
    CacheStrategy::NetworkFirstWithOfflineFallback
  } else {
    CacheStrategy::StaleWhileRevalidate
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Pass through to the network untouched
  Bypass,
  Strategy(CacheStrategy),
}

/// Request classifier. First match wins.
#[derive(Debug, Clone)]
pub struct RouteTable {
  api_routes: Vec<String>,
}

impl RouteTable {
  pub fn new(api_routes: Vec<String>) -> Self {
    Self { api_routes }
  }

  pub fn from_config(config: &RouterConfig) -> Self {
    Self::new(config.api_routes.clone())
  }

  pub fn is_api_route(&self, path: &str) -> bool {
    self.api_routes.iter().any(|prefix| path.starts_with(prefix))
  }

  pub fn classify(&self, request: &Request) -> Route {
    if request.method != reqwest::Method::GET || !request.is_http() {
      return Route::Bypass;
    }

    let path = request.url.path();
    let strategy = if self.is_api_route(path) {
      CacheStrategy::NetworkFirst
    } else if is_static_asset(path) {
      CacheStrategy::CacheFirst
    } else if request.accepts_html() {
      CacheStrategy::NetworkFirstWithOfflineFallback
    } else {
      CacheStrategy::StaleWhileRevalidate
    };

    Route::Strategy(strategy)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;

  fn table() -> RouteTable {
    RouteTable::from_config(&RouterConfig::default())
  }

  #[test]
  fn test_path_strategies() {
    assert_eq!(cache_strategy_for_path("/api/x", true).as_str(), "network-first");
    assert_eq!(cache_strategy_for_path("/bundle.js", false).as_str(), "cache-first");
    assert_eq!(cache_strategy_for_path("/assets/logo.png", false), CacheStrategy::CacheFirst);
    assert_eq!(
      cache_strategy_for_path("/", false).as_str(),
      "network-first-with-offline-fallback"
    );
    assert_eq!(
      cache_strategy_for_path("/dashboard.html", false),
      CacheStrategy::NetworkFirstWithOfflineFallback
    );
    assert_eq!(
      cache_strategy_for_path("/data.json", false).as_str(),
      "stale-while-revalidate"
    );
  }

  #[test]
  fn test_classify_bypasses_non_get_and_non_http() {
    let post = Request::new(Method::POST, "http://localhost:3000/api/trpc/tasks.create").unwrap();
    assert_eq!(table().classify(&post), Route::Bypass);

    let extension = Request::get("chrome-extension://abc/script.js").unwrap();
    assert_eq!(table().classify(&extension), Route::Bypass);
  }

  #[test]
  fn test_classify_order() {
    let table = table();
    let strategy = |url: &str, html: bool| {
      let mut request = Request::get(url).unwrap();
      if html {
        request = request.with_header("accept", "text/html");
      }
      table.classify(&request)
    };

    // API prefix wins over a static extension
    assert_eq!(
      strategy("http://localhost:3000/api/export.js", false),
      Route::Strategy(CacheStrategy::NetworkFirst)
    );
    assert_eq!(
      strategy("http://localhost:3000/fonts/a.woff2", true),
      Route::Strategy(CacheStrategy::CacheFirst)
    );
    assert_eq!(
      strategy("http://localhost:3000/dashboard", true),
      Route::Strategy(CacheStrategy::NetworkFirstWithOfflineFallback)
    );
    assert_eq!(
      strategy("http://localhost:3000/manifest.json", false),
      Route::Strategy(CacheStrategy::StaleWhileRevalidate)
    );
  }
}
