//! End-to-end tests over a real TCP socket: wire format, keep-alive handling
//! and post-response tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use restash::cache::{CacheEngine, CacheMiddleware, MemoryStore};
use restash::context::Context;
use restash::middleware::Pipeline;
use restash::server::Server;
use restash::{Request, Response, StatusCode};

async fn spawn_cached(calls: Arc<AtomicUsize>) -> (SocketAddr, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(CacheEngine::builder(Arc::clone(&store) as _).build());
    let pipeline = Pipeline::new(move |ctx: Context| {
        let calls = Arc::clone(&calls);
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Response::new(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(format!(r#"{{"path":"{}","n":{n}}}"#, ctx.request().path()))
        }
    })
    .layer(CacheMiddleware::new(engine));

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run(move |req: Request| {
        let pipeline = pipeline.clone();
        async move { pipeline.handle(req).await }
    }));
    (addr, store)
}

/// Sends one `Connection: close` request and returns the raw response text.
async fn fetch(addr: SocketAddr, target: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    String::from_utf8(raw).unwrap()
}

#[tokio::test]
async fn second_connection_is_served_from_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (addr, _store) = spawn_cached(Arc::clone(&calls)).await;

    let first = fetch(addr, "/wp/v2/posts").await;
    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"), "{first}");
    assert!(first.contains("X-Api-Cache: cached\r\n"), "{first}");
    assert!(first.contains("Connection: close\r\n"), "{first}");
    assert!(first.ends_with(r#"{"path":"/wp/v2/posts","n":1}"#), "{first}");

    let second = fetch(addr, "/wp/v2/posts").await;
    assert!(second.ends_with(r#"{"path":"/wp/v2/posts","n":1}"#), "{second}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn soft_delete_runs_after_the_response_is_written() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (addr, store) = spawn_cached(Arc::clone(&calls)).await;

    fetch(addr, "/wp/v2/posts").await;
    assert_eq!(store.len(), 1);

    let res = fetch(addr, "/wp/v2/posts?cache_delete=1").await;
    assert!(res.contains("X-Api-Cache-Delete: soft\r\n"), "{res}");
    assert!(res.ends_with(r#""n":1}"#), "served the stored entry: {res}");

    // The connection closes only after post-response tasks finish.
    assert!(store.is_empty());

    let res = fetch(addr, "/wp/v2/posts").await;
    assert!(res.ends_with(r#""n":2}"#), "{res}");
}

#[tokio::test]
async fn keep_alive_serves_pipelined_requests_in_order() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (addr, _store) = spawn_cached(Arc::clone(&calls)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /a HTTP/1.1\r\nHost: localhost\r\n\r\n\
              GET /b HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();

    let a = text.find(r#""path":"/a""#).unwrap();
    let b = text.find(r#""path":"/b""#).unwrap();
    assert!(a < b);
    assert!(text.contains("Connection: keep-alive\r\n"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
