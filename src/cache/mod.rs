//! Response caching layer.
//!
//! [`CacheEngine`] decides, per request, whether to serve a stored response,
//! recompute it, or bypass storage altogether. Responses are stored whole
//! (status, headers and body) in a [`KeyValueStore`] under a key derived from
//! the request URI, and every response the engine returns is labelled with
//! [`CACHE_HEADER`].
//!
//! Clients steer the engine with three query parameters, none of which ever
//! reach a cache key:
//!
//! | parameter            | effect                                                   |
//! |----------------------|----------------------------------------------------------|
//! | `cache_delete`       | serve as usual, then remove the entry after responding   |
//! | `cache_force_delete` | remove the entry first, then recompute and store it      |
//! | `cache_refresh`      | recompute without reading or writing the store           |
//!
//! The engine plugs into a server either as a middleware layer
//! ([`CacheMiddleware`]) or by calling [`CacheEngine::dispatch`] with any
//! [`Dispatcher`].

pub mod admin;
pub mod config;
pub mod engine;
pub mod hooks;
pub mod key;
pub mod middleware;
pub mod policy;
pub mod store;

pub use admin::admin_router;
pub use config::CacheConfig;
pub use engine::{
    CACHE_HEADER, CacheBypass, CacheEngine, CacheEngineBuilder, CacheStatus, DELETE_HEADER,
    DeleteStatus, Dispatcher,
};
pub use hooks::{CacheHooks, NoHooks};
pub use middleware::CacheMiddleware;
pub use policy::{SettingsProvider, SharedSettings, TtlPolicy};
pub use store::{KeyValueStore, MemoryStore, StoreError};
