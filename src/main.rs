//! Filegate
//!
//! Admission-controlled file gateway over interchangeable storage backends.
//!
//! The process assembles the gateway from a YAML configuration and serves
//! its operational surface:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       filegate                            │
//! ├──────────────────────────────────────────────────────────┤
//! │  health server  : /healthz /livez /readyz /status         │
//! │  metrics server : /metrics (admission gauges per class)   │
//! └──────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, IntGaugeVec, TextEncoder};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use filegate::admission::AdmissionSnapshot;
use filegate::{FileGateway, GatewayConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Filegate - admission-controlled file gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gateway configuration file (YAML); defaults to one local backend under ./data
    #[arg(long, env = "FILEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
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
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting Filegate");

    let config = match &args.config {
        Some(path) => GatewayConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => GatewayConfig::default(),
    };

    info!("  Selection policy: {}", config.selection);
    info!("  Upload slots: {}", config.admission.upload_slots);
    info!("  Download slots: {}", config.admission.download_slots);
    for backend in &config.backends {
        info!("  Backend: {} ({})", backend.name(), backend.kind());
    }

    let gateway = Arc::new(
        FileGateway::from_config(&config)
            .await
            .context("assembling file gateway")?,
    );

    let gauges = AdmissionGauges::register().context("registering admission metrics")?;

    let health_gateway = Arc::clone(&gateway);
    let health_addr = args.health_addr.clone();
    let health = tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_gateway).await {
            error!("Health server error: {:#}", e);
        }
    });

    let metrics_gateway = Arc::clone(&gateway);
    let metrics_addr = args.metrics_addr.clone();
    let metrics = tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_gateway, gauges).await {
            error!("Metrics server error: {:#}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    health.abort();
    metrics.abort();

    info!("Filegate shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse::<Directive>()?)
        .add_directive("aws_config=warn".parse::<Directive>()?)
        .add_directive("aws_smithy_runtime=warn".parse::<Directive>()?);

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
// HTTP Plumbing
// =============================================================================

type HttpResponse = Response<Full<Bytes>>;

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

fn not_found() -> HttpResponse {
    respond(StatusCode::NOT_FOUND, "text/plain", "not found")
}

/// Accept connections on `addr` and serve each with `handler`.
async fn serve<H, F>(name: &str, addr: &str, handler: H) -> anyhow::Result<()>
where
    H: Fn(Request<hyper::body::Incoming>) -> F + Clone + Send + Sync + 'static,
    F: std::future::Future<Output = Result<HttpResponse, Infallible>> + Send + 'static,
{
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid {} server address '{}'", name, addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {} server to {}", name, addr))?;

    info!("{} server listening on {}", name, addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .with_context(|| format!("{} server accept", name))?;

        let io = TokioIo::new(stream);
        let handler = handler.clone();
        let name = name.to_string();

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handler))
                .await
            {
                error!("{} server connection error: {}", name, e);
            }
        });
    }
}

// =============================================================================
// Health Server
// =============================================================================

#[derive(Serialize)]
struct StatusReport {
    selection: String,
    backends: Vec<String>,
    admission: Vec<AdmissionSnapshot>,
}

async fn run_health_server(addr: &str, gateway: Arc<FileGateway>) -> anyhow::Result<()> {
    serve("Health", addr, move |req| {
        let gateway = Arc::clone(&gateway);
        async move { Ok::<_, Infallible>(health_handler(req, &gateway)) }
    })
    .await
}

fn health_handler(req: Request<hyper::body::Incoming>, gateway: &FileGateway) -> HttpResponse {
    match req.uri().path() {
        "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "text/plain", "ok"),
        "/status" => {
            let selector = gateway.selector();
            let report = StatusReport {
                selection: selector.policy().to_string(),
                backends: selector
                    .registry()
                    .names()
                    .into_iter()
                    .map(String::from)
                    .collect(),
                admission: gateway.admission_snapshot(),
            };
            match serde_json::to_vec(&report) {
                Ok(body) => respond(StatusCode::OK, "application/json", body),
                Err(e) => respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    e.to_string(),
                ),
            }
        }
        _ => not_found(),
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

/// Admission gauges, refreshed from the controller on every scrape
#[derive(Clone)]
struct AdmissionGauges {
    active: IntGaugeVec,
    queued: IntGaugeVec,
}

impl AdmissionGauges {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            active: prometheus::register_int_gauge_vec!(
                "filegate_admission_active",
                "Operations currently holding an admission slot",
                &["class"]
            )?,
            queued: prometheus::register_int_gauge_vec!(
                "filegate_admission_queued",
                "Operations currently waiting for an admission slot",
                &["class"]
            )?,
        })
    }

    fn refresh(&self, snapshots: &[AdmissionSnapshot]) {
        for snap in snapshots {
            let class = snap.class.as_str();
            self.active.with_label_values(&[class]).set(snap.active as i64);
            self.queued.with_label_values(&[class]).set(snap.queued as i64);
        }
    }
}

async fn run_metrics_server(
    addr: &str,
    gateway: Arc<FileGateway>,
    gauges: AdmissionGauges,
) -> anyhow::Result<()> {
    serve("Metrics", addr, move |req| {
        let gateway = Arc::clone(&gateway);
        let gauges = gauges.clone();
        async move { Ok::<_, Infallible>(metrics_handler(req, &gateway, &gauges)) }
    })
    .await
}

fn metrics_handler(
    req: Request<hyper::body::Incoming>,
    gateway: &FileGateway,
    gauges: &AdmissionGauges,
) -> HttpResponse {
    match req.uri().path() {
        "/metrics" => {
            gauges.refresh(&gateway.admission_snapshot());

            let encoder = TextEncoder::new();
            let metric_families = prometheus::gather();
            let mut buffer = Vec::new();
            match encoder.encode(&metric_families, &mut buffer) {
                Ok(()) => respond(StatusCode::OK, encoder.format_type(), buffer),
                Err(e) => respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    e.to_string(),
                ),
            }
        }
        _ => not_found(),
    }
}
