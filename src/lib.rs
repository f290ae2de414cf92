//! # restash
//!
//! A response cache for JSON REST APIs, served as an async HTTP/1.1 reverse
//! proxy or embedded as middleware.
//!
//! Responses are stored whole and keyed by request URI. Clients can delete,
//! force-delete or refresh an entry per request with the `cache_delete`,
//! `cache_force_delete` and `cache_refresh` query parameters. Every response
//! carries an `X-Api-Cache: cached | refreshed | skipped` header.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use restash::cache::{CacheEngine, CacheMiddleware, MemoryStore};
//! use restash::middleware::Pipeline;
//! use restash::server::Server;
//! use restash::{Request, Response, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(CacheEngine::builder(Arc::new(MemoryStore::new())).build());
//!     let pipeline = Pipeline::new(|_ctx| async {
//!         Response::new(StatusCode::OK)
//!             .header("Content-Type", "application/json")
//!             .body(r#"[{"id":1}]"#)
//!     })
//!     .layer(CacheMiddleware::new(engine));
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server
//!         .run(move |req: Request| {
//!             let pipeline = pipeline.clone();
//!             async move { pipeline.handle(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod background;
pub mod cache;
pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod proxy;
pub mod router;
pub mod server;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
