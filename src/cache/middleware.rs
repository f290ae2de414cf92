use std::{future::Future, pin::Pin, sync::Arc};

use super::engine::CacheEngine;
use crate::{
    Response,
    context::Context,
    middleware::{Middleware, Next},
};

/// Caches whatever the rest of the middleware chain produces.
///
/// Layers added after this one, and the endpoint, form the origin: they only
/// run on a miss, a refresh or a skip.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use restash::{Response, StatusCode};
/// use restash::cache::{CacheEngine, CacheMiddleware, MemoryStore};
/// use restash::middleware::{LoggerMiddleware, Pipeline};
///
/// let engine = Arc::new(CacheEngine::builder(Arc::new(MemoryStore::new())).build());
/// let pipeline = Pipeline::new(|_ctx| async { Response::new(StatusCode::OK).body("[]") })
///     .layer(LoggerMiddleware)
///     .layer(CacheMiddleware::new(engine));
/// ```
#[derive(Debug, Clone)]
pub struct CacheMiddleware {
    engine: Arc<CacheEngine>,
}

impl CacheMiddleware {
    pub fn new(engine: Arc<CacheEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }
}

impl Middleware for CacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let engine = Arc::clone(&self.engine);
        Box::pin(async move { engine.handle(ctx, |ctx| next.run(ctx)).await })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::{CACHE_HEADER, MemoryStore};
    use crate::middleware::Pipeline;
    use crate::{Method, Request, StatusCode};

    fn counting_pipeline(calls: Arc<AtomicUsize>) -> Pipeline {
        let engine = Arc::new(CacheEngine::builder(Arc::new(MemoryStore::new())).build());
        Pipeline::new(move |ctx: Context| {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Response::new(StatusCode::OK).body(format!("{} #{n}", ctx.request().path()))
            }
        })
        .layer(CacheMiddleware::new(engine))
    }

    #[tokio::test]
    async fn second_request_is_served_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = counting_pipeline(Arc::clone(&calls));

        let first = pipeline.handle(Request::new(Method::Get, "/posts")).await;
        let second = pipeline.handle(Request::new(Method::Get, "/posts")).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.content(), b"/posts #1");
        assert_eq!(second.content(), b"/posts #1");
        assert_eq!(second.headers().get(CACHE_HEADER), Some("cached"));
    }

    #[tokio::test]
    async fn refresh_runs_the_rest_of_the_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = counting_pipeline(Arc::clone(&calls));

        pipeline.handle(Request::new(Method::Get, "/posts")).await;
        let res = pipeline
            .handle(Request::new(Method::Get, "/posts?cache_refresh=true"))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(res.content(), b"/posts #2");
        assert_eq!(res.headers().get(CACHE_HEADER), Some("refreshed"));

        let cached = pipeline.handle(Request::new(Method::Get, "/posts")).await;
        assert_eq!(cached.content(), b"/posts #1");
    }
}
