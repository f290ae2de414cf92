//! Reverse-proxy origin: forwards requests to an upstream HTTP service.
//!
//! [`Upstream`] is a cache [`Dispatcher`]. It strips the cache control
//! parameters and hop-by-hop headers before forwarding, and turns transport
//! failures into `502 Bad Gateway` so the engine never stores them.
//!
//! `Accept-Encoding` is not forwarded either. Entries are shared by every
//! client of a URI, so the upstream must answer with an identity body.

pub mod gateway;

pub use gateway::Gateway;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::cache::Dispatcher;
use crate::cache::key::strip_control_params;
use crate::config::UpstreamConfig;
use crate::context::Context;
use crate::{Headers, Request, Response, StatusCode};

/// Headers that describe one connection and are never relayed.
const HOP_BY_HOP: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Errors building an [`Upstream`] or a request to it.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid upstream URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported method {0}")]
    Method(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Returns `true` for headers scoped to a single hop.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

// Request headers that would make the upstream vary a shared entry.
fn is_withheld(name: &str) -> bool {
    is_hop_by_hop(name) || name.eq_ignore_ascii_case("accept-encoding")
}

/// An HTTP origin reached through `reqwest`.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base: Url,
}

impl Upstream {
    /// Creates an upstream rooted at `base_url`. Request paths are appended to
    /// the base path, so `http://host/wp-json` + `/wp/v2/posts` forwards to
    /// `http://host/wp-json/wp/v2/posts`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProxyError> {
        let base = Url::parse(base_url).map_err(|e| ProxyError::InvalidUrl {
            url: base_url.to_owned(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ProxyError::InvalidUrl {
                url: base_url.to_owned(),
                reason: "cannot be a base URL".to_owned(),
            });
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, ProxyError> {
        Self::new(&config.base_url, config.timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// The upstream URL for `request`, without cache control parameters.
    pub fn target_url(&self, request: &Request) -> Url {
        let mut url = self.base.clone();
        let path = format!("{}{}", self.base.path().trim_end_matches('/'), request.path());
        url.set_path(&path);
        url.set_query(request.query_string().and_then(strip_control_params).as_deref());
        url
    }

    /// Forwards `request` and relays the upstream response.
    ///
    /// Never fails: transport errors become a `502` response.
    pub async fn forward(&self, request: &Request) -> Response {
        match self.try_forward(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    method = %request.method(),
                    path = %request.path(),
                    error = %e,
                    "upstream request failed"
                );
                Response::new(StatusCode::BAD_GATEWAY).body("upstream unavailable")
            }
        }
    }

    async fn try_forward(&self, request: &Request) -> Result<Response, ProxyError> {
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|_| ProxyError::Method(request.method().to_string()))?;
        let url = self.target_url(request);
        debug!(%method, %url, "forwarding upstream");

        let mut builder = self.client.request(method, url);
        for (name, value) in request.headers().iter() {
            if !is_withheld(name) {
                builder = builder.header(name, value);
            }
        }
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let upstream = builder.send().await?;
        let status = StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);

        let mut headers = Headers::with_capacity(upstream.headers().len());
        for (name, value) in upstream.headers() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str(), value);
            }
        }
        let body = upstream.bytes().await?;

        let mut response = Response::new(status).body_bytes(body.to_vec());
        response.headers_mut().extend(headers);
        Ok(response)
    }
}

impl Dispatcher for Upstream {
    fn dispatch(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send + '_>> {
        Box::pin(async move { self.forward(ctx.request()).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    fn upstream(base: &str) -> Upstream {
        Upstream::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn target_url_joins_base_path_and_drops_control_params() {
        let up = upstream("http://origin.test/wp-json/");
        let req = Request::new(Method::Get, "/wp/v2/posts?page=2&cache_refresh=1");
        assert_eq!(
            up.target_url(&req).as_str(),
            "http://origin.test/wp-json/wp/v2/posts?page=2"
        );

        let req = Request::new(Method::Get, "/wp/v2/posts?cache_delete=1");
        assert_eq!(
            up.target_url(&req).as_str(),
            "http://origin.test/wp-json/wp/v2/posts"
        );
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(matches!(
            Upstream::new("mailto:ops@example.com", Duration::from_secs(1)),
            Err(ProxyError::InvalidUrl { .. })
        ));
        assert!(matches!(
            Upstream::new("::", Duration::from_secs(1)),
            Err(ProxyError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn hop_by_hop_is_case_insensitive() {
        assert!(is_hop_by_hop("Transfer-Encoding"));
        assert!(is_hop_by_hop("HOST"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("X-WP-Total"));
    }

    #[test]
    fn accept_encoding_is_withheld() {
        assert!(is_withheld("Accept-Encoding"));
        assert!(is_withheld("connection"));
        assert!(!is_withheld("Accept"));
        assert!(!is_withheld("Authorization"));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        // Port 9 (discard) is closed on test hosts; the connect fails fast.
        let up = upstream("http://127.0.0.1:9");
        let res = up.forward(&Request::new(Method::Get, "/posts")).await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn bad_gateway_is_not_cached_behind_an_engine() {
        use std::sync::Arc;

        use crate::cache::{CACHE_HEADER, CacheEngine, MemoryStore};

        let store = Arc::new(MemoryStore::new());
        let engine = CacheEngine::builder(Arc::clone(&store) as _).build();
        let up = upstream("http://127.0.0.1:9");

        let res = engine
            .dispatch(Context::new(Request::new(Method::Get, "/posts")), &up)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(res.headers().get(CACHE_HEADER), Some("skipped"));
        assert!(store.is_empty());
    }
}
