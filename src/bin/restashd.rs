//! restashd: caching reverse proxy daemon.
//!
//! Caches an upstream JSON API in memory and serves it over HTTP/1.1.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info};

use restash::Request;
use restash::cache::{KeyValueStore, MemoryStore};
use restash::config::Config;
use restash::proxy::Gateway;
use restash::server::Server;

/// How often expired entries are swept from the in-memory store.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// restash daemon: caching reverse proxy for JSON APIs.
#[derive(Parser)]
#[command(name = "restashd")]
#[command(version)]
#[command(about = "Caching reverse proxy for JSON REST APIs")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "RESTASH_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding `server.address`.
    #[arg(short, long)]
    address: Option<String>,

    /// Upstream base URL, overriding `upstream.base_url`.
    #[arg(short, long)]
    upstream: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Default: info; override with RUST_LOG.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(address) = args.address {
        config.server.address = address;
    }
    if let Some(upstream) = args.upstream {
        config.upstream.base_url = upstream;
    }
    config.validate()?;

    let store = Arc::new(MemoryStore::new());
    spawn_purger(Arc::clone(&store));

    let gateway = Arc::new(Gateway::from_config(
        &config,
        Arc::clone(&store) as Arc<dyn KeyValueStore>,
    )?);

    let server = Server::bind(&config.server.address).await?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        address = %server.local_addr(),
        upstream = %config.upstream.base_url,
        "restashd starting"
    );

    server
        .run(move |req: Request| {
            let gateway = Arc::clone(&gateway);
            async move { gateway.handle(req).await }
        })
        .await?;

    Ok(())
}

fn spawn_purger(store: Arc<MemoryStore>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = store.len(), "expired cache entries purged");
            }
        }
    });
}
