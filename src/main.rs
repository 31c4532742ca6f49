//! targetd Provisioner
//!
//! Dynamically provisions iSCSI persistent volumes for claims whose storage
//! class names this provisioner, using a targetd server as the backend.

use clap::{Parser, ValueEnum};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use kube::Client;
use prometheus::Registry;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use targetd_provisioner::controlplane::{metrics, reconciler};
use targetd_provisioner::{
    BackendConfig, BackendFactory, Context, Error, KubeVolumeStore, Metrics, ProvisionerConfig,
    Result, StorageClassCache, TargetdConfig, VolumeLifecycleController, VolumeStoreRef,
};

// =============================================================================
// CLI Arguments
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// targetd Provisioner - dynamic iSCSI volumes for Kubernetes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name matched against storage classes and claim annotations
    #[arg(long, env = "TARGETD_PROVISIONER_NAME", default_value = "targetd")]
    provisioner_name: String,

    /// targetd JSON-RPC endpoint
    #[arg(long, env = "TARGETD_PROVISIONER_API_URL")]
    api_url: String,

    #[arg(long, env = "TARGETD_PROVISIONER_API_USERNAME")]
    api_username: String,

    #[arg(long, env = "TARGETD_PROVISIONER_API_PASSWORD", hide_env_values = true)]
    api_password: String,

    /// Skip TLS certificate verification of the targetd API
    #[arg(long, env = "TARGETD_PROVISIONER_API_INSECURE_SKIP_VERIFY")]
    api_insecure_skip_verify: bool,

    /// Timeout of a single targetd request
    #[arg(long, env = "TARGETD_PROVISIONER_API_TIMEOUT_SECS", default_value = "30")]
    api_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TARGETD_PROVISIONER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "TARGETD_PROVISIONER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Health server bind address
    #[arg(long, env = "TARGETD_PROVISIONER_HEALTH_ADDR", default_value = "0.0.0.0:8080")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "TARGETD_PROVISIONER_METRICS_ADDR", default_value = "0.0.0.0:9090")]
    metrics_addr: String,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting targetd provisioner");
    info!("  Version: {}", targetd_provisioner::VERSION);
    info!("  Provisioner name: {}", args.provisioner_name);
    info!("  targetd API: {}", args.api_url);
    if args.api_insecure_skip_verify {
        info!("  TLS verification of the targetd API is disabled");
    }

    let health_addr = parse_addr(&args.health_addr, "health server")?;
    let metrics_addr = parse_addr(&args.metrics_addr, "metrics server")?;

    let backend = BackendFactory::create(
        "targetd",
        BackendConfig {
            targetd: TargetdConfig {
                api_url: args.api_url.clone(),
                username: args.api_username.clone(),
                password: args.api_password.clone(),
                insecure_skip_verify: args.api_insecure_skip_verify,
                timeout: Duration::from_secs(args.api_timeout_secs),
            },
        },
    )?;

    let client = Client::try_default().await?;
    let store: VolumeStoreRef = Arc::new(KubeVolumeStore::new(client.clone()));

    let config = ProvisionerConfig {
        provisioner_name: args.provisioner_name.clone(),
        instance: std::env::var("HOSTNAME").ok(),
        ..Default::default()
    };
    let controller = VolumeLifecycleController::new(StorageClassCache::new(), backend, store)
        .with_field_manager(config.field_manager.clone());

    let registry = Arc::new(Registry::new());
    let metrics = Metrics::new(&registry)?;
    let ctx = Context::new(client, controller, &config, metrics);

    // Start health server
    let health_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_ctx).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    reconciler::run(ctx).await;

    info!("Provisioner shutdown complete");
    Ok(())
}

fn parse_addr(addr: &str, what: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} address {}: {}", what, addr, e)))
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

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for raw in ["hyper=warn", "kube=info", "tower=warn", "reqwest=warn"] {
        let directive: Directive = raw
            .parse()
            .map_err(|e| Error::Configuration(format!("Invalid log directive {}: {}", raw, e)))?;
        filter = filter.add_directive(directive);
    }

    match args.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init(),
    }

    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

fn respond(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}

fn health_response(path: &str, ready: bool) -> Response<Body> {
    match path {
        "/live" | "/healthz" | "/livez" => respond(StatusCode::OK, "ok"),
        "/readyz" if ready => respond(StatusCode::OK, "ok"),
        "/readyz" => respond(StatusCode::SERVICE_UNAVAILABLE, "storage classes not synced"),
        _ => respond(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn run_health_server(addr: SocketAddr, ctx: Arc<Context>) -> Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let ctx = ctx.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let response = health_response(req.uri().path(), ctx.is_ready());
                async move { Ok::<_, Infallible>(response) }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

fn metrics_response(path: &str, registry: &Registry) -> Response<Body> {
    if path != "/metrics" {
        return respond(StatusCode::NOT_FOUND, "not found");
    }

    match metrics::encode(registry) {
        Ok((content_type, buffer)) => {
            let mut response = respond(StatusCode::OK, buffer);
            if let Ok(value) = content_type.parse::<hyper::header::HeaderValue>() {
                response
                    .headers_mut()
                    .insert(hyper::header::CONTENT_TYPE, value);
            }
            response
        }
        Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn run_metrics_server(addr: SocketAddr, registry: Arc<Registry>) -> Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let response = metrics_response(req.uri().path(), &registry);
                async move { Ok::<_, Infallible>(response) }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
