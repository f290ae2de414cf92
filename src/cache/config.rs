//! Engine configuration, read from the `[cache]` table of the config file.

use serde::Deserialize;

use super::policy::TtlPolicy;
use crate::{Method, StatusCode};

/// Namespace used when no group is configured.
pub const DEFAULT_GROUP: &str = "rest_api";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Namespace for every key this engine writes.
    pub group: String,
    /// Statuses that may be stored.
    pub cacheable_statuses: Vec<u16>,
    /// Methods that go through lookup; every other method is skipped.
    pub cacheable_methods: Vec<String>,
    /// Bypass the cache for every request.
    pub skip: bool,
    /// Bypass requests carrying `Authorization` or `Cookie`, and never store
    /// responses that set cookies or are marked `private` or `no-store`.
    pub bypass_private: bool,
    /// Sort query pairs by name before keying.
    pub sort_query_params: bool,
    /// Let only one request per key recompute a missing entry at a time.
    pub single_flight: bool,
    /// Initial TTL policy, used when no settings provider is supplied.
    pub timeout: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_owned(),
            cacheable_statuses: vec![StatusCode::OK.as_u16()],
            cacheable_methods: vec![Method::Get.as_str().to_owned()],
            skip: false,
            bypass_private: true,
            sort_query_params: true,
            single_flight: true,
            timeout: TtlPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Returns `true` if `method` is in the cacheable method list.
    pub fn caches_method(&self, method: &Method) -> bool {
        self.cacheable_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method.as_str()))
    }

    /// Returns `true` if `status` is in the cacheable status list.
    pub fn caches_status(&self, status: StatusCode) -> bool {
        self.cacheable_statuses.contains(&status.as_u16())
    }
}
