//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the gateway is up.
//!
//! # Tasks
//! - Sweeper: Purges expired cache entries at a configured interval

mod cleanup;

pub use cleanup::spawn_cleanup_task;
