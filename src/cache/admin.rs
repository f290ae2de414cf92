//! Administrative endpoints for flushing entries and changing the TTL policy.
//!
//! | method   | path                    | effect                                  |
//! |----------|-------------------------|-----------------------------------------|
//! | `POST`   | `{prefix}/flush`        | empty the whole store                   |
//! | `DELETE` | `{prefix}/entries?key=` | delete one key from the engine's group  |
//! | `GET`    | `{prefix}/settings`     | current TTL policy                      |
//! | `PUT`    | `{prefix}/settings`     | replace the TTL policy                  |
//!
//! These routes are never cached. Mount them ahead of the cached pipeline and
//! keep them off public listeners.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::engine::CacheEngine;
use super::policy::{SettingsProvider, SharedSettings, TtlPolicy};
use crate::context::Context;
use crate::router::Router;
use crate::{Response, StatusCode};

#[derive(Debug, Serialize)]
struct SettingsBody {
    length: u64,
    period: u64,
    seconds: u64,
}

impl From<TtlPolicy> for SettingsBody {
    fn from(policy: TtlPolicy) -> Self {
        Self {
            length: policy.length,
            period: policy.period,
            seconds: policy.seconds(),
        }
    }
}

fn error(status: StatusCode, message: impl std::fmt::Display) -> Response {
    Response::json(status, &json!({ "error": message.to_string() }))
}

/// Builds the admin router under `prefix`, e.g. `/_cache`.
///
/// `settings` should be the provider the engine was built with, so policy
/// updates reach the next cache write.
pub fn admin_router(engine: Arc<CacheEngine>, settings: Arc<SharedSettings>, prefix: &str) -> Router {
    let prefix = prefix.trim_end_matches('/');
    let mut router = Router::new();

    let flush_engine = Arc::clone(&engine);
    router.post(&format!("{prefix}/flush"), move |_ctx: Context| {
        let engine = Arc::clone(&flush_engine);
        async move {
            match engine.flush_all().await {
                Ok(flushed) => {
                    info!(flushed, "cache flushed via admin endpoint");
                    Response::json(StatusCode::OK, &json!({ "flushed": flushed }))
                }
                Err(e) => {
                    warn!(error = %e, "admin flush failed");
                    error(StatusCode::SERVICE_UNAVAILABLE, e)
                }
            }
        }
    });

    let delete_engine = Arc::clone(&engine);
    router.delete(&format!("{prefix}/entries"), move |ctx: Context| {
        let engine = Arc::clone(&delete_engine);
        async move {
            let Some(key) = ctx.request().query_param("key").filter(|k| !k.is_empty()) else {
                return error(StatusCode::BAD_REQUEST, "missing `key` query parameter");
            };
            match engine.delete_cache_by_key(key).await {
                Ok(deleted) => {
                    info!(%key, deleted, "cache entry deleted via admin endpoint");
                    Response::json(StatusCode::OK, &json!({ "deleted": deleted }))
                }
                Err(e) => {
                    warn!(%key, error = %e, "admin delete failed");
                    error(StatusCode::SERVICE_UNAVAILABLE, e)
                }
            }
        }
    });

    let read_settings = Arc::clone(&settings);
    router.get(&format!("{prefix}/settings"), move |_ctx: Context| {
        let body = SettingsBody::from(read_settings.timeout_policy());
        async move { Response::json(StatusCode::OK, &body) }
    });

    router.put(&format!("{prefix}/settings"), move |ctx: Context| {
        let settings = Arc::clone(&settings);
        async move {
            let policy = match ctx.json::<TtlPolicy>() {
                Ok(policy) => policy,
                Err(e) => return error(StatusCode::BAD_REQUEST, e),
            };
            match settings.update(policy) {
                Ok(previous) => {
                    info!(
                        from_secs = previous.seconds(),
                        to_secs = policy.seconds(),
                        "cache TTL policy updated"
                    );
                    Response::json(StatusCode::OK, &SettingsBody::from(policy))
                }
                Err(e) => error(StatusCode::BAD_REQUEST, e),
            }
        }
    });

    router
}
