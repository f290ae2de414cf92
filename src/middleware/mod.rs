//! Middleware pipeline: composable before/after request handler logic.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`Pipeline`]: an ordered stack of layers in front of a terminal endpoint.
//! - [`LoggerMiddleware`]: built-in request/response logger.
//!
//! The response cache is itself a layer
//! ([`CacheMiddleware`](crate::cache::CacheMiddleware)): whatever follows it in
//! the chain is the origin it caches.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::router::Handler;
use crate::{Request, Response, StatusCode, context::Context};

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is passed to each middleware's [`Middleware::handle`] implementation.
/// Calling [`Next::run`] advances the cursor by one position and invokes the next
/// middleware. Once the layers are exhausted the endpoint runs; without an
/// endpoint a fallback `500` response is returned.
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be called
/// more than once per middleware invocation.
///
/// # Examples
///
/// ```rust,no_run
/// use std::pin::Pin;
/// use restash::{Response, context::Context, middleware::{Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(
///         &self,
///         ctx: Context,
///         next: Next,
///     ) -> Pin<Box<dyn std::future::Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    endpoint: Option<Handler>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
///
/// Construct one with [`from_middleware`] or by wrapping a closure directly:
///
/// ```rust,no_run
/// use std::{future::Future, pin::Pin, sync::Arc};
/// use restash::{Response, context::Context, middleware::{MiddlewareHandler, Next}};
///
/// let handler: MiddlewareHandler = Arc::new(
///     |ctx: Context, next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     },
/// );
/// ```
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given middleware stack,
    /// with no endpoint behind it.
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            endpoint: None,
            index: 0,
        }
    }

    /// Creates a new `Next` whose chain ends in `endpoint`.
    pub fn with_endpoint(middlewares: Vec<MiddlewareHandler>, endpoint: Handler) -> Self {
        Self {
            middlewares,
            endpoint: Some(endpoint),
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain (or the endpoint once the
    /// layers are exhausted) and returns its response.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else if let Some(endpoint) = self.endpoint.take() {
            endpoint(ctx).await
        } else {
            Response::new(StatusCode::INTERNAL_SERVER_ERROR)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through**: call `next.run(ctx).await` without modification.
/// - **Short-circuit**: return a [`Response`] directly without calling `next`.
/// - **Decorate**: call `next.run(ctx).await`, inspect the response, and return
///   a modified copy.
///
/// Implementations must be `Send + Sync` because middleware is shared across
/// Tokio tasks, and must not hold `&mut` references to shared state across an
/// `.await` point.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next middleware.
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// An ordered middleware stack in front of a terminal endpoint.
///
/// # Examples
///
/// ```rust,no_run
/// use restash::{Method, Request, Response, StatusCode};
/// use restash::middleware::{LoggerMiddleware, Pipeline};
///
/// # async fn example() {
/// let pipeline = Pipeline::new(|_ctx| async { Response::new(StatusCode::OK).body("hi") })
///     .layer(LoggerMiddleware);
///
/// let response = pipeline.handle(Request::new(Method::Get, "/")).await;
/// assert_eq!(response.status(), StatusCode::OK);
/// # }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    layers: Vec<MiddlewareHandler>,
    endpoint: Handler,
}

impl Pipeline {
    /// Creates a pipeline with no layers in front of `endpoint`.
    pub fn new<H, F>(endpoint: H) -> Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let endpoint: Handler = Arc::new(
            move |ctx: Context| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                Box::pin(endpoint(ctx))
            },
        );
        Self::from_handler(endpoint)
    }

    /// Creates a pipeline around an already type-erased endpoint.
    pub fn from_handler(endpoint: Handler) -> Self {
        Self {
            layers: Vec::new(),
            endpoint,
        }
    }

    /// Appends a layer. Layers run in the order they are added.
    #[must_use]
    pub fn layer<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.layers.push(from_middleware(Arc::new(middleware)));
        self
    }

    /// Returns the number of layers in front of the endpoint.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if requests go straight to the endpoint.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs `request` through every layer and the endpoint.
    pub async fn handle(&self, request: Request) -> Response {
        self.handle_context(Context::new(request)).await
    }

    /// Runs an existing context through every layer and the endpoint.
    pub async fn handle_context(&self, ctx: Context) -> Response {
        Next::with_endpoint(self.layers.clone(), Arc::clone(&self.endpoint))
            .run(ctx)
            .await
    }
}

/// Built-in middleware that logs each request's method, path, status, and duration.
///
/// Emits a single `tracing::info!` line after the downstream handler completes.
/// It never short-circuits.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();

            let response = next.run(ctx).await;

            let status = response.status().as_u16();
            let cache = response
                .headers()
                .get(crate::cache::CACHE_HEADER)
                .unwrap_or("-")
                .to_owned();

            tracing::info!(
                %method,
                %path,
                status,
                %cache,
                elapsed = ?start.elapsed(),
                "request completed"
            );

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    struct Tag(&'static str);

    impl Middleware for Tag {
        fn handle(
            &self,
            ctx: Context,
            next: Next,
        ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            let tag = self.0;
            Box::pin(async move {
                let mut response = next.run(ctx).await;
                response.add_header("X-Layer", tag);
                response
            })
        }
    }

    #[tokio::test]
    async fn exhausted_chain_without_endpoint_is_500() {
        let res = Next::new(vec![])
            .run(Context::new(Request::new(Method::Get, "/")))
            .await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn layers_wrap_endpoint_in_order() {
        let pipeline = Pipeline::new(|_ctx| async { Response::new(StatusCode::OK) })
            .layer(Tag("outer"))
            .layer(Tag("inner"));
        assert_eq!(pipeline.len(), 2);

        let res = pipeline.handle(Request::new(Method::Get, "/")).await;
        let layers: Vec<_> = res.headers().get_all("x-layer").collect();
        // inner decorates first on the way out
        assert_eq!(layers, vec!["inner", "outer"]);
    }

    #[tokio::test]
    async fn logger_passes_response_through() {
        let pipeline =
            Pipeline::new(|_ctx| async { Response::new(StatusCode::CREATED) }).layer(LoggerMiddleware);
        let res = pipeline.handle(Request::new(Method::Post, "/items")).await;
        assert_eq!(res.status(), StatusCode::CREATED);
    }
}
