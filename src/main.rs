//! FatCache node
//!
//! Runs one cache node: a single group backed by a demo data source, the
//! peer protocol server, and an admin server for metrics and health.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    fatcache node                     │
//! ├──────────────────────────────────────────────────────┤
//! │  peer server (FATCACHE_ADDR)   /_fatcache/<g>/<key>  │
//! │  admin server (METRICS_ADDR)   /metrics /healthz     │
//! │                                /readyz  /stats       │
//! └──────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fatcache::error::{Error, Result};
use fatcache::{Getter, GroupConfig, GroupRegistry, HttpPool, MetricsExporter, PoolConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// FatCache - distributed read-through cache node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address this node serves the peer protocol on (also its peer identity)
    #[arg(long, env = "FATCACHE_ADDR", default_value = "127.0.0.1:8001")]
    addr: String,

    /// Comma-separated list of all peers, including this node
    #[arg(long, env = "FATCACHE_PEERS", value_delimiter = ',')]
    peers: Vec<String>,

    /// Group name
    #[arg(long, env = "FATCACHE_GROUP", default_value = "exampleGroup")]
    group: String,

    /// Local store budget in bytes
    #[arg(long, env = "FATCACHE_CACHE_BYTES", default_value = "1048576")]
    cache_bytes: i64,

    /// Peer fetch timeout in milliseconds
    #[arg(long, env = "FATCACHE_PEER_TIMEOUT_MS", default_value = "5000")]
    peer_timeout_ms: u64,

    /// Virtual nodes per peer on the hash ring
    #[arg(long, env = "FATCACHE_REPLICAS", default_value = "50")]
    replicas: usize,

    /// Metrics and health server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Demo Data Source
// =============================================================================

/// Answers every key with `Value for <key>`
struct DemoGetter;

#[async_trait]
impl Getter for DemoGetter {
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        info!(key = %key, "Loading data for key");
        Ok(format!("Value for {}", key).into_bytes())
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting FatCache node");
    info!("  Address: {}", args.addr);
    info!("  Group: {} ({} bytes)", args.group, args.cache_bytes);
    info!("  Peers: {:?}", args.peers);

    let registry = Arc::new(GroupRegistry::new());
    let group = registry.new_group_with(
        GroupConfig::new(args.group.clone(), args.cache_bytes),
        Arc::new(DemoGetter),
    );

    let pool_config = PoolConfig {
        replicas: args.replicas,
        request_timeout: Duration::from_millis(args.peer_timeout_ms),
        ..Default::default()
    };
    let pool = Arc::new(HttpPool::with_config(
        &args.addr,
        Arc::clone(&registry),
        pool_config,
    )?);

    if !args.peers.is_empty() {
        pool.set_peers(args.peers.as_slice());
        group.register_peers(pool.clone());
    }

    // Start metrics and health server
    let metrics_addr = args.metrics_addr.clone();
    let admin_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        if let Err(e) = run_admin_server(&metrics_addr, admin_registry).await {
            error!("Admin server error: {}", e);
        }
    });

    // Serve peers until the listener fails
    pool.bind_and_serve(&args.addr).await?;

    info!("Node shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let directive = |s: &str| -> Result<Directive> {
        s.parse()
            .map_err(|e| Error::Config(format!("Invalid log directive {}: {}", s, e)))
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("reqwest=warn")?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Admin Server
// =============================================================================

async fn run_admin_server(addr: &str, registry: Arc<GroupRegistry>) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, content_type: &str, body: Vec<u8>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        if let Ok(value) = HeaderValue::from_str(content_type) {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
        response
    }

    async fn admin_handler(
        req: Request<hyper::body::Incoming>,
        registry: Arc<GroupRegistry>,
        exporter: Arc<MetricsExporter>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/livez" | "/readyz" => {
                respond(StatusCode::OK, "text/plain", b"ok".to_vec())
            }
            "/metrics" => match exporter.gather(&registry) {
                Ok(buffer) => respond(StatusCode::OK, exporter.format_type(), buffer),
                Err(e) => respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    e.to_string().into_bytes(),
                ),
            },
            "/stats" => {
                let stats: Vec<_> = registry.groups().iter().map(|g| g.stats()).collect();
                match serde_json::to_vec(&stats) {
                    Ok(body) => respond(StatusCode::OK, "application/json", body),
                    Err(e) => respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain",
                        e.to_string().into_bytes(),
                    ),
                }
            }
            _ => respond(StatusCode::NOT_FOUND, "text/plain", b"not found".to_vec()),
        };
        Ok(response)
    }

    let exporter = Arc::new(MetricsExporter::new()?);

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let registry = Arc::clone(&registry);
        let exporter = Arc::clone(&exporter);

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                admin_handler(req, Arc::clone(&registry), Arc::clone(&exporter))
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
