//! Offline cache router for the application shell.
//!
//! This module provides a service-worker style request router that:
//! - Classifies requests into bypass or one of four caching strategies
//! - Keeps responses in a single versioned bucket, purging old versions on activation
//! - Forwards background-sync tags and push notifications to open pages

mod bucket;
mod clients;
mod fetch;
mod request;
mod strategy;
mod worker;

pub use bucket::{BucketStorage, CachedResponse, SqliteBuckets};
pub use clients::{ClientMessage, ClientRegistry, ClientWindow};
pub use fetch::{Fetcher, HttpFetcher};
pub use request::{Request, Response};
pub use strategy::{
  cache_strategy_for_path, is_static_asset, CacheStrategy, Route, RouteTable, STATIC_EXTENSIONS,
};
pub use worker::{
  ActivationReport, ClickOutcome, FetchOutcome, Notification, NotificationAction,
  PrecacheReport, ResponseSource, Served, ServiceWorker, WorkerMessage, WorkerState,
};
