//! Extension points for host integration.
//!
//! Every method has a default that leaves the engine's behaviour unchanged,
//! so an implementation only overrides what it needs. Filter-style hooks
//! receive the value the engine computed and return the value to use.
//!
//! Hooks run on every request and must be cheap. `cache_key` and
//! `cache_group` must be deterministic: the same logical request has to map
//! to the same key every time, or entries become unreachable.
//!
//! ```
//! use restash::Request;
//! use restash::cache::CacheHooks;
//!
//! /// Keys every entry by the caller's locale as well as the URI.
//! struct PerLocale;
//!
//! impl CacheHooks for PerLocale {
//!     fn cache_key(&self, key: String, request: &Request) -> String {
//!         let locale = request.headers().get("accept-language").unwrap_or("any");
//!         format!("{locale}|{key}")
//!     }
//! }
//! ```

use std::time::Duration;

use super::policy::TtlPolicy;
use crate::{Headers, Request, StatusCode};

pub trait CacheHooks: Send + Sync {
    /// Extra headers added to every response the engine returns. They are
    /// never stored.
    fn response_headers(&self, _request: &Request) -> Headers {
        Headers::new()
    }

    /// Remaps the derived cache key. The result is sanitized again.
    fn cache_key(&self, key: String, _request: &Request) -> String {
        key
    }

    /// Overrides the cache group.
    fn cache_group(&self, group: String) -> String {
        group
    }

    /// Decides whether to bypass the cache entirely for this request.
    /// `default` is the configured decision.
    fn skip(&self, default: bool, _request: &Request) -> bool {
        default
    }

    /// Overrides the TTL resolved from the settings provider.
    fn ttl(&self, ttl: Duration, _policy: &TtlPolicy) -> Duration {
        ttl
    }

    /// Decides whether a response with `status` may be stored. `default`
    /// reflects the configured allow-list.
    fn is_cacheable(&self, _status: StatusCode, default: bool) -> bool {
        default
    }

    /// Called when a request bypasses the cache.
    fn on_skipped(&self, _request: &Request) {}
}

/// Hooks that change nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl CacheHooks for NoHooks {}
