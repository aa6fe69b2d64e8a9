//! Offline-first sync engine, cache router and AI response cache for NeuroPlan.

pub mod app;
pub mod config;
pub mod event;
pub mod logging;
pub mod models;
pub mod response_cache;
pub mod router;
pub mod store;
pub mod sync;
