//! Assembles the caching reverse proxy served by `restashd`.

use std::sync::Arc;

use tracing::info;

use super::{ProxyError, Upstream};
use crate::cache::{
    CacheEngine, CacheMiddleware, KeyValueStore, SettingsProvider, SharedSettings, admin_router,
};
use crate::config::Config;
use crate::middleware::{LoggerMiddleware, Pipeline};
use crate::router::Router;
use crate::{Request, Response};

/// Admin routes in front of a logged, cached pipeline ending in an [`Upstream`].
///
/// ```text
/// request ─┬─ admin route? ──> admin router
///          └─ otherwise ─────> LoggerMiddleware -> CacheMiddleware -> Upstream
/// ```
pub struct Gateway {
    engine: Arc<CacheEngine>,
    settings: Arc<SharedSettings>,
    admin: Option<Router>,
    pipeline: Pipeline,
}

impl Gateway {
    /// Builds a gateway over `store` from configuration.
    pub fn from_config(config: &Config, store: Arc<dyn KeyValueStore>) -> Result<Self, ProxyError> {
        let upstream = Arc::new(Upstream::from_config(&config.upstream)?);
        let settings = Arc::new(SharedSettings::new(config.cache.timeout));
        let engine = Arc::new(
            CacheEngine::builder(store)
                .config(config.cache.clone())
                .settings(Arc::clone(&settings) as Arc<dyn SettingsProvider>)
                .build(),
        );

        let admin_prefix = config.admin.enabled.then_some(config.admin.prefix.as_str());
        info!(
            upstream = %upstream.base_url(),
            group = %engine.group(),
            admin = admin_prefix.unwrap_or("disabled"),
            "gateway assembled"
        );
        Ok(Self::new(engine, settings, upstream, admin_prefix))
    }

    /// Wires `engine` in front of `upstream`, mounting the admin routes under
    /// `admin_prefix` when given.
    pub fn new(
        engine: Arc<CacheEngine>,
        settings: Arc<SharedSettings>,
        upstream: Arc<Upstream>,
        admin_prefix: Option<&str>,
    ) -> Self {
        let admin = admin_prefix
            .map(|prefix| admin_router(Arc::clone(&engine), Arc::clone(&settings), prefix));

        let pipeline = Pipeline::new(move |ctx| {
            let upstream = Arc::clone(&upstream);
            async move { upstream.forward(ctx.request()).await }
        })
        .layer(LoggerMiddleware)
        .layer(CacheMiddleware::new(Arc::clone(&engine)));

        Self {
            engine,
            settings,
            admin,
            pipeline,
        }
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }

    pub fn settings(&self) -> &Arc<SharedSettings> {
        &self.settings
    }

    /// Serves one request.
    pub async fn handle(&self, request: Request) -> Response {
        if let Some(admin) = &self.admin {
            if admin.matches(request.method(), request.path()) {
                return admin.route(request).await;
            }
        }
        self.pipeline.handle(request).await
    }
}
