//! Fetch Module
//!
//! The consumer-facing side of the cache: a pluggable transport, the
//! read-through cached fetch, and resource handles for call sites.

mod cached;
mod resource;
mod transport;

pub use cached::CachedFetch;
pub use resource::{Resource, ResourceState};
pub use transport::{FetchRequest, HttpTransport, Transport};
