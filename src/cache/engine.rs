//! The cache decision engine.
//!
//! For every request the engine walks the same checks in order:
//!
//! 1. collect pass-through headers from [`CacheHooks::response_headers`];
//! 2. **delete**: `cache_force_delete` removes the entry now and clears the
//!    delete flags, `cache_delete` queues removal until after the response is
//!    sent. Both fall through;
//! 3. **refresh**: `cache_refresh`, or a [`CacheBypass`] marker left by an
//!    outer pass, dispatches to the origin without lookup or store;
//! 4. **skip**: a bypassed request is dispatched with no store access at all;
//! 5. **lookup**: a hit is returned as stored, a miss is dispatched, and the
//!    result stored if its status is cacheable.
//!
//! A response the origin produced with a non-cacheable status is never
//! stored; its key is queued for removal in case a concurrent request wrote
//! it, and it is labelled `skipped`.
//!
//! Store failures never fail a request: a failed read is a miss, a failed
//! write or delete is logged and dropped.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::hooks::{CacheHooks, NoHooks};
use super::key::{self, ControlFlags, DELETE_PARAM, FORCE_DELETE_PARAM};
use super::policy::{SettingsProvider, SharedSettings};
use super::store::{KeyValueStore, StoreError};
use crate::background::AfterResponse;
use crate::context::Context;
use crate::{Request, Response, StatusCode};

/// Response header carrying the [`CacheStatus`] of every engine response.
pub const CACHE_HEADER: &str = "X-Api-Cache";

/// Response header set when the request asked for its entry to be deleted.
pub const DELETE_HEADER: &str = "X-Api-Cache-Delete";

/// How the engine served a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from, or written to, the store.
    Cached,
    /// Recomputed on request without touching the store.
    Refreshed,
    /// Not cached: bypassed, or the status is not cacheable.
    Skipped,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Refreshed => "refreshed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of [`DELETE_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Removed before the request was served.
    Removed,
    /// Queued for removal after the response is sent.
    Soft,
}

impl DeleteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Removed => "true",
            Self::Soft => "soft",
        }
    }
}

/// Context extension marking a request the engine is already recomputing.
///
/// Set before a miss is dispatched. If the origin routes the same context
/// through an engine again, that pass takes the refresh path instead of
/// looking the key up (and, with single-flight on, waiting on itself).
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheBypass;

/// The origin the engine caches.
///
/// Must be safe to call with a context carrying [`CacheBypass`].
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send + '_>>;
}

/// The response cache decision engine.
///
/// Built once per process with [`CacheEngine::builder`] and shared behind an
/// `Arc`. See the [module docs](self) for the request flow.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use restash::{Method, Request, Response, StatusCode};
/// use restash::cache::{CACHE_HEADER, CacheEngine};
/// use restash::cache::store::MemoryStore;
/// use restash::context::Context;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let engine = CacheEngine::builder(Arc::new(MemoryStore::new())).build();
/// let origin = |_ctx: Context| async { Response::new(StatusCode::OK).body("[]") };
///
/// let first = engine
///     .handle(Context::new(Request::new(Method::Get, "/posts")), origin)
///     .await;
/// assert_eq!(first.headers().get(CACHE_HEADER), Some("cached"));
///
/// let second = engine
///     .handle(Context::new(Request::new(Method::Get, "/posts")), |_ctx: Context| async {
///         Response::new(StatusCode::OK).body("recomputed")
///     })
///     .await;
/// assert_eq!(second.content(), b"[]");
/// # }
/// ```
pub struct CacheEngine {
    store: Arc<dyn KeyValueStore>,
    settings: Arc<dyn SettingsProvider>,
    hooks: Arc<dyn CacheHooks>,
    config: CacheConfig,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

/// Builder for [`CacheEngine`].
pub struct CacheEngineBuilder {
    store: Arc<dyn KeyValueStore>,
    settings: Option<Arc<dyn SettingsProvider>>,
    hooks: Option<Arc<dyn CacheHooks>>,
    config: CacheConfig,
}

impl CacheEngineBuilder {
    /// Uses `settings` for the TTL policy instead of `config.timeout`.
    #[must_use]
    pub fn settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = Some(settings);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn CacheHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    #[must_use]
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> CacheEngine {
        let settings = self
            .settings
            .unwrap_or_else(|| Arc::new(SharedSettings::new(self.config.timeout)));
        CacheEngine {
            store: self.store,
            settings,
            hooks: self.hooks.unwrap_or_else(|| Arc::new(NoHooks)),
            config: self.config,
            in_flight: DashMap::new(),
        }
    }
}

// Holds the per-key recompute lock; the map slot is dropped with the last holder.
struct InFlight<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    slot: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.map
            .remove_if(&self.slot, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl CacheEngine {
    pub fn builder(store: Arc<dyn KeyValueStore>) -> CacheEngineBuilder {
        CacheEngineBuilder {
            store,
            settings: None,
            hooks: None,
            config: CacheConfig::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// The cache key for `request`, after the `cache_key` hook.
    pub fn derive_key(&self, request: &Request) -> String {
        let base = key::derive_key(request, self.config.sort_query_params);
        key::sanitize(&self.hooks.cache_key(base, request))
    }

    /// The cache group, after the `cache_group` hook.
    pub fn group(&self) -> String {
        key::sanitize(&self.hooks.cache_group(self.config.group.clone()))
    }

    /// The TTL for the next write: `length × period`, through the `ttl` hook.
    pub fn resolve_ttl(&self) -> Duration {
        let policy = self.settings.timeout_policy();
        self.hooks.ttl(policy.as_duration(), &policy)
    }

    /// Empties the whole store.
    pub async fn flush_all(&self) -> Result<bool, StoreError> {
        let flushed = self.store.flush_all().await?;
        debug!(flushed, "cache flushed");
        Ok(flushed)
    }

    /// Deletes one key from this engine's group.
    pub async fn delete_cache_by_key(&self, key: &str) -> Result<bool, StoreError> {
        self.store.delete(key, &self.group()).await
    }

    /// Runs `ctx` through the engine with `dispatcher` as the origin.
    pub async fn dispatch<D>(&self, ctx: Context, dispatcher: &D) -> Response
    where
        D: Dispatcher + ?Sized,
    {
        self.handle(ctx, |ctx| dispatcher.dispatch(ctx)).await
    }

    /// Runs `ctx` through the engine. `origin` is called at most once.
    pub async fn handle<F, Fut>(&self, mut ctx: Context, origin: F) -> Response
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Response>,
    {
        let mut extra = self.hooks.response_headers(ctx.request());
        let mut after = AfterResponse::new();
        let key = self.derive_key(ctx.request());
        let group = self.group();
        let flags = ControlFlags::from_request(ctx.request());

        if flags.force_delete {
            match self.store.delete(&key, &group).await {
                Ok(removed) => debug!(%key, %group, removed, "cache entry deleted"),
                Err(e) => warn!(%key, %group, error = %e, "cache delete failed"),
            }
            extra.set(DELETE_HEADER, DeleteStatus::Removed.as_str());
            let request = ctx.request_mut();
            request.remove_param(FORCE_DELETE_PARAM);
            request.remove_param(DELETE_PARAM);
        } else if flags.delete {
            after.push(self.deferred_delete(key.clone(), group.clone()));
            extra.set(DELETE_HEADER, DeleteStatus::Soft.as_str());
        }

        let mut response = if flags.refresh || ctx.extensions().contains::<CacheBypass>() {
            debug!(%key, %group, outcome = "refresh", "bypassing cache lookup");
            let mut response = origin(ctx).await;
            self.label(&mut response, CacheStatus::Refreshed, &key, &group, &mut after);
            response
        } else if self.should_skip(ctx.request()) {
            self.hooks.on_skipped(ctx.request());
            debug!(
                method = %ctx.request().method(),
                path = %ctx.request().path(),
                outcome = "skip",
                "cache skipped"
            );
            let mut response = origin(ctx).await;
            response.set_header(CACHE_HEADER, CacheStatus::Skipped.as_str());
            response
        } else {
            self.lookup_or_dispatch(ctx, origin, &key, &group, &mut after)
                .await
        };

        response.headers_mut().extend(extra);
        response.after_response_mut().append(after);
        response
    }

    async fn lookup_or_dispatch<F, Fut>(
        &self,
        mut ctx: Context,
        origin: F,
        key: &str,
        group: &str,
        after: &mut AfterResponse,
    ) -> Response
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Response>,
    {
        if let Some(hit) = self.lookup(key, group).await {
            return hit;
        }

        let _flight = if self.config.single_flight {
            let flight = self.enter_flight(key, group).await;
            // Another request may have filled the entry while we waited.
            if let Some(hit) = self.lookup(key, group).await {
                return hit;
            }
            Some(flight)
        } else {
            None
        };

        debug!(%key, %group, outcome = "miss", "dispatching to origin");
        ctx.extensions_mut().insert(CacheBypass);
        let mut response = origin(ctx).await;

        if self.is_storable(&response) {
            response.set_header(CACHE_HEADER, CacheStatus::Cached.as_str());
            let ttl = self.resolve_ttl();
            let encoded = serde_json::to_vec(&response).map(Bytes::from);
            let written = match encoded {
                Ok(encoded) => self.write(key, group, encoded, ttl).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = written {
                warn!(%key, %group, error = %e, "cache write failed");
            }
        } else {
            self.label(&mut response, CacheStatus::Cached, key, group, after);
        }

        response
    }

    async fn lookup(&self, key: &str, group: &str) -> Option<Response> {
        let bytes = match self.store.get(key, group).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(%key, %group, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice::<Response>(&bytes) {
            Ok(mut response) => {
                debug!(%key, %group, outcome = "hit", "serving cached response");
                response.set_header(CACHE_HEADER, CacheStatus::Cached.as_str());
                Some(response)
            }
            Err(e) => {
                warn!(%key, %group, error = %e, "undecodable cache entry, treating as miss");
                None
            }
        }
    }

    async fn write(
        &self,
        key: &str,
        group: &str,
        encoded: Bytes,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.store.set(key, encoded, group, ttl).await?;
        debug!(%key, %group, ttl_secs = ttl.as_secs(), "cached response stored");
        Ok(())
    }

    // Labels a freshly dispatched response, downgrading to `skipped` and
    // queuing cleanup when it may not be cached.
    fn label(
        &self,
        response: &mut Response,
        status: CacheStatus,
        key: &str,
        group: &str,
        after: &mut AfterResponse,
    ) {
        if self.is_storable(response) {
            response.set_header(CACHE_HEADER, status.as_str());
        } else {
            debug!(
                %key,
                %group,
                status = response.status().as_u16(),
                "response not cacheable, queuing cleanup"
            );
            after.push(self.deferred_delete(key.to_owned(), group.to_owned()));
            response.set_header(CACHE_HEADER, CacheStatus::Skipped.as_str());
        }
    }

    fn deferred_delete(&self, key: String, group: String) -> impl Future<Output = ()> + Send + 'static {
        let store = Arc::clone(&self.store);
        async move {
            match store.delete(&key, &group).await {
                Ok(removed) => debug!(%key, %group, removed, "deferred cache delete"),
                Err(e) => warn!(%key, %group, error = %e, "deferred cache delete failed"),
            }
        }
    }

    fn should_skip(&self, request: &Request) -> bool {
        let default = self.config.skip
            || !self.config.caches_method(request.method())
            || (self.config.bypass_private && carries_credentials(request));
        self.hooks.skip(default, request)
    }

    fn is_cacheable(&self, status: StatusCode) -> bool {
        self.hooks
            .is_cacheable(status, self.config.caches_status(status))
    }

    fn is_storable(&self, response: &Response) -> bool {
        self.is_cacheable(response.status())
            && !(self.config.bypass_private && is_private(response))
    }

    async fn enter_flight(&self, key: &str, group: &str) -> InFlight<'_> {
        let slot = format!("{group}:{key}");
        let lock = Arc::clone(&*self.in_flight.entry(slot.clone()).or_default());
        // The guard exists before the wait so a cancelled waiter still
        // releases its slot.
        let mut flight = InFlight {
            map: &self.in_flight,
            slot,
            guard: None,
        };
        flight.guard = Some(lock.lock_owned().await);
        flight
    }
}

/// Returns `true` if the request identifies its caller.
fn carries_credentials(request: &Request) -> bool {
    request.headers().contains("authorization") || request.headers().contains("cookie")
}

/// Returns `true` if the response is meant for one client only.
fn is_private(response: &Response) -> bool {
    let headers = response.headers();
    if headers.contains("set-cookie") {
        return true;
    }
    headers
        .get_all("cache-control")
        .flat_map(|value| value.split(','))
        .map(|directive| directive.split('=').next().unwrap_or_default().trim())
        .any(|name| name.eq_ignore_ascii_case("private") || name.eq_ignore_ascii_case("no-store"))
}

impl fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEngine")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}
