//! Request Cache - An in-memory response cache for HTTP APIs
//!
//! Caches responses per (method, URL, params) with a TTL and collapses
//! concurrent identical requests into one upstream call.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{CacheKey, CacheManager, FetchOutcome, HttpMethod, TtlPreset};
pub use config::Config;
pub use error::{CacheError, Result};
pub use fetch::{CachedFetch, HttpTransport, Resource, Transport};
pub use tasks::spawn_cleanup_task;
