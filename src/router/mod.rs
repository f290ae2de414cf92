//! Request routing: map URL patterns and HTTP methods to handler functions.
//!
//! This module provides [`Router`], which dispatches incoming HTTP requests to handler
//! functions based on the request method and URL path. Three pattern styles are supported:
//!
//! | Pattern              | Example match              | Captured params              |
//! |----------------------|----------------------------|------------------------------|
//! | `/users`             | `/users`                   | *(none)*                     |
//! | `/users/:id`         | `/users/42`                | `id → "42"`                  |
//! | `/files/*`           | `/files/docs/readme.txt`   | `wildcard → "/docs/readme.txt"` |
//!
//! Trailing slashes are normalized on both patterns and incoming paths, so `/users/` and
//! `/users` are treated as equivalent.
//!
//! Routes are matched in registration order; the first route whose method and pattern both
//! match the incoming request wins.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::cache::Dispatcher;
use crate::context::{Context, PathParams};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased, heap-allocated async handler that processes a [`Context`] and returns a
/// [`Response`].
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be cloned and shared across
/// threads without copying the underlying closure. The same type serves as the terminal
/// endpoint of a [`Pipeline`](crate::middleware::Pipeline).
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone)]
enum Pattern {
    // Matches one exact path string, e.g. `/users`.
    Exact(String),
    // Matches a fixed number of segments where some may be named captures, e.g. `/users/:id`.
    Parameterized { segments: Vec<Segment> },
    // Matches any path that starts with the given prefix, e.g. `/files/*`.
    Wildcard(String),
}

impl Pattern {
    // Compile a pattern string. A trailing `/*` makes a wildcard, any `:` makes a
    // parameterized pattern, anything else is an exact match. A trailing slash
    // (other than the root) is ignored.
    fn parse(pattern: &str) -> Self {
        let pattern = if pattern != "/" && pattern.ends_with('/') {
            &pattern[..pattern.len() - 1]
        } else {
            pattern
        };

        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Pattern::Wildcard(prefix.to_string());
        }

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    if let Some(p) = s.strip_prefix(':') {
                        Segment::Parameter(p.to_string())
                    } else {
                        Segment::Static(s.to_string())
                    }
                })
                .collect();

            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_string())
    }

    // Try to match `path` against this pattern, returning extracted [`PathParams`] on success.
    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = if path != "/" && path.ends_with('/') {
            &path[..path.len() - 1]
        } else {
            path
        };

        match self {
            Pattern::Exact(p) => {
                if p == path {
                    Some(PathParams::new())
                } else {
                    None
                }
            }
            Pattern::Parameterized { segments } => {
                let mut params = PathParams::new();
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

                if segments.len() != path_segments.len() {
                    return None;
                }

                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) => {
                            if s != path_seg {
                                return None;
                            }
                        }
                        Segment::Parameter(name) => {
                            params.insert(name.clone(), path_seg.to_string());
                        }
                    }
                }

                Some(params)
            }
            Pattern::Wildcard(prefix) => {
                if let Some(suffix) = path.strip_prefix(prefix) {
                    let mut params = PathParams::new();
                    params.insert("wildcard".to_string(), suffix.to_string());
                    Some(params)
                } else {
                    None
                }
            }
        }
    }
}

// A single registered route binding a method + pattern to a handler.
struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

impl Route {
    fn new(method: Method, pattern: &str, handler: Handler) -> Self {
        Self {
            method,
            pattern: Pattern::parse(pattern),
            handler,
        }
    }

    // Returns `Some(params)` when both the HTTP method and path pattern match, `None` otherwise.
    fn matches(&self, method: &Method, path: &str) -> Option<PathParams> {
        if &self.method == method {
            self.pattern.matches(path)
        } else {
            None
        }
    }
}

/// HTTP request router that dispatches requests to registered handler functions.
///
/// Routes are evaluated in registration order; the first route whose HTTP method and path
/// pattern both match the incoming request is used. When no route matches, a
/// `404 Not Found` response is returned.
///
/// A router is also a cache [`Dispatcher`]: put one behind a
/// [`CacheEngine`](crate::cache::CacheEngine) to cache its responses.
///
/// # Examples
///
/// ```rust,no_run
/// use restash::{Router, Response, StatusCode};
///
/// let mut router = Router::new();
///
/// router.get("/ping", |_ctx| async { Response::new(StatusCode::OK) });
///
/// router.get("/posts/:id", |ctx| async move {
///     let id = ctx.params().get("id").unwrap_or("unknown").to_owned();
///     Response::new(StatusCode::OK).body(id)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register a handler for `GET` requests matching `path`.
    pub fn get<H, F>(&mut self, path: &str, handler: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.add_route(Method::Get, path, handler);
    }

    /// Register a handler for `POST` requests matching `path`.
    pub fn post<H, F>(&mut self, path: &str, handler: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.add_route(Method::Post, path, handler);
    }

    /// Register a handler for `PUT` requests matching `path`.
    pub fn put<H, F>(&mut self, path: &str, handler: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.add_route(Method::Put, path, handler);
    }

    /// Register a handler for `DELETE` requests matching `path`.
    pub fn delete<H, F>(&mut self, path: &str, handler: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.add_route(Method::Delete, path, handler);
    }

    /// Register a handler for `PATCH` requests matching `path`.
    pub fn patch<H, F>(&mut self, path: &str, handler: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.add_route(Method::Patch, path, handler);
    }

    // Erase the concrete handler type and store it as a `Handler` trait object.
    fn add_route<H, F>(&mut self, method: Method, path: &str, handler: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler: Handler = Arc::new(
            move |ctx: Context| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                Box::pin(handler(ctx))
            },
        );
        self.routes.push(Route::new(method, path, handler));
    }

    /// Return the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Return `true` if some route accepts `method` on `path`.
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.routes
            .iter()
            .any(|route| route.matches(method, path).is_some())
    }

    /// Dispatch `request` to the first matching route and return its response.
    pub async fn route(&self, request: Request) -> Response {
        self.route_context(Context::new(request)).await
    }

    /// Dispatch an existing context, keeping its extensions.
    ///
    /// The matched route's path parameters replace those already on `ctx`.
    pub async fn route_context(&self, mut ctx: Context) -> Response {
        let matched = self.routes.iter().find_map(|route| {
            route
                .matches(ctx.request().method(), ctx.request().path())
                .map(|params| (route, params))
        });

        match matched {
            Some((route, params)) => {
                ctx.set_params(params);
                (route.handler)(ctx).await
            }
            None => Response::new(StatusCode::NOT_FOUND),
        }
    }
}

impl Dispatcher for Router {
    fn dispatch(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send + '_>> {
        Box::pin(self.route_context(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> Request {
        Request::new(Method::Get, path)
    }

    #[test]
    fn pattern_kinds() {
        assert!(matches!(Pattern::parse("/"), Pattern::Exact(s) if s == "/"));
        assert!(matches!(Pattern::parse("/wp/v2/posts/"), Pattern::Exact(s) if s == "/wp/v2/posts"));
        assert!(matches!(Pattern::parse("/assets/*"), Pattern::Wildcard(s) if s == "/assets"));
        match Pattern::parse("/posts/:id/revisions/:rev") {
            Pattern::Parameterized { segments } => {
                assert_eq!(segments.len(), 4);
                assert!(matches!(&segments[1], Segment::Parameter(s) if s == "id"));
                assert!(matches!(&segments[3], Segment::Parameter(s) if s == "rev"));
            }
            other => panic!("expected Parameterized, got {other:?}"),
        }
    }

    #[test]
    fn exact_pattern_ignores_trailing_slash() {
        let pat = Pattern::parse("/posts");
        assert!(pat.matches("/posts/").is_some());
        assert!(pat.matches("/pages").is_none());
    }

    #[test]
    fn parameterized_pattern_captures_segments() {
        let pat = Pattern::parse("/posts/:id/revisions/:rev");
        let params = pat.matches("/posts/7/revisions/99").unwrap();
        assert_eq!(params.get("id"), Some("7"));
        assert_eq!(params.get("rev"), Some("99"));
        assert!(pat.matches("/posts/7").is_none());
        assert!(pat.matches("/pages/7/revisions/99").is_none());
    }

    #[test]
    fn wildcard_pattern_captures_suffix() {
        let pat = Pattern::parse("/assets/*");
        let params = pat.matches("/assets/css/site.css").unwrap();
        assert_eq!(params.get("wildcard"), Some("/css/site.css"));
        assert!(pat.matches("/other/site.css").is_none());
    }

    #[tokio::test]
    async fn unmatched_request_is_404() {
        let mut router = Router::new();
        router.get("/posts", |_ctx| async { Response::new(StatusCode::OK) });
        assert_eq!(router.route(get("/pages")).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            router.route(Request::new(Method::Post, "/posts")).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let mut router = Router::new();
        router.get("/posts", |_ctx| async { Response::new(StatusCode::OK) });
        router.get("/posts", |_ctx| async { Response::new(StatusCode::ACCEPTED) });
        assert_eq!(router.len(), 2);
        assert_eq!(router.route(get("/posts")).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn handlers_see_path_params_and_extensions() {
        struct Tenant(&'static str);

        let mut router = Router::new();
        router.get("/posts/:id", |ctx: Context| async move {
            let id = ctx.params().get("id").unwrap_or_default().to_owned();
            let tenant = ctx.extensions().get::<Tenant>().map_or("none", |t| t.0);
            Response::new(StatusCode::OK).body(format!("{tenant}:{id}"))
        });

        let mut ctx = Context::new(get("/posts/42"));
        ctx.extensions_mut().insert(Tenant("acme"));
        let res = router.dispatch(ctx).await;
        assert_eq!(res.content(), b"acme:42");
    }

    #[tokio::test]
    async fn method_helpers_register_routes() {
        let mut router = Router::new();
        router.post("/r", |_ctx| async { Response::new(StatusCode::CREATED) });
        router.put("/r", |_ctx| async { Response::new(StatusCode::OK) });
        router.patch("/r", |_ctx| async { Response::new(StatusCode::OK) });
        router.delete("/r", |_ctx| async { Response::new(StatusCode::NO_CONTENT) });
        assert_eq!(router.len(), 4);
        assert!(router.matches(&Method::Patch, "/r"));
        assert!(!router.matches(&Method::Get, "/r"));
        assert_eq!(
            router.route(Request::new(Method::Delete, "/r")).await.status(),
            StatusCode::NO_CONTENT
        );
    }
}
