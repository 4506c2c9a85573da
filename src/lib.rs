//! # emergency-cache
//!
//! An HTTP caching layer that keeps a site answering while its origin is down.
//!
//! In normal operation the [`EmergencyCache`](cache::EmergencyCache) handler
//! forwards every request and copies eligible `200` responses into a blob
//! store off the request path. Flip it into emergency mode and requests are
//! served from that store, falling back to the origin only on a miss.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use emergency_cache::cache::{EmergencyCache, Persister, PersisterConfig, store::MemoryStore};
//! use emergency_cache::config::CacheConfig;
//! use emergency_cache::proxy::Upstream;
//! use emergency_cache::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let persister = Persister::spawn(store.clone(), PersisterConfig::default());
//!     let origin = Upstream::new("http://127.0.0.1:3000".parse()?)?;
//!     let cache = EmergencyCache::new(CacheConfig::default(), store, persister.handle(), origin);
//!
//!     Server::bind("127.0.0.1:8080").await?.run(cache).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod proxy;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheStore, CachedResponse, EmergencyCache, Persister};
pub use config::CacheConfig;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
