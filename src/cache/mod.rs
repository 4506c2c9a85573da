//! Emergency caching layer.
//!
//! While the origin is healthy, responses it marks as cacheable (or that sit
//! under `/build/`) are copied into a blob store in the background. When
//! emergency mode is switched on, requests are answered from that store and
//! the origin is only consulted for entries that were never stored.
//!
//! ## Core types
//!
//! - [`EmergencyCache`] — the [`Handler`](crate::middleware::Handler) that
//!   decides, per request, whether to bypass, replay or forward.
//! - [`CachedResponse`] — the stored unit and its JSON wire format.
//! - [`RequestKeys`] / [`derive_key`] — full and query-stripped keys.
//! - [`is_cacheable`] — storage eligibility.
//! - [`Persister`] — bounded pool of background store writers.
//! - [`store`] — the [`CacheStore`] trait and its backends.

pub mod entry;
pub mod interceptor;
pub mod key;
pub mod persister;
pub mod policy;
pub mod store;

pub use entry::{CachedResponse, CodecError};
pub use interceptor::{BYPASS_VALUE, Decision, EmergencyCache};
pub use key::{RequestKeys, derive_key};
pub use persister::{PersistHandle, Persister, PersisterConfig, PersisterStats, ShutdownMode};
pub use policy::{BUILD_ASSET_PREFIX, MARKER_VALUE, is_cacheable};
pub use store::{CacheStore, StoreError, open_store};
