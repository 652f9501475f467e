//! Petstore server binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use petstore_server::network::{NetworkConfig, NetworkModule};
use petstore_server::service::{
    CompositeEventSink, EventSink, JsonLinesEventSink, ServerConfig, TracingEventSink,
};
use petstore_server::telemetry::{init_tracing, install_metrics_exporter, LogFormat};
use petstore_server::PetstoreApp;
use tracing::info;

/// Command-line options; every flag can also come from the environment.
#[derive(Debug, Parser)]
#[command(name = "petstore-server", version, about = "Petstore orchestration server")]
struct Cli {
    #[arg(long, env = "PETSTORE_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PETSTORE_PORT", default_value_t = 5000)]
    port: u16,

    /// Per-field timeout in milliseconds; 0 disables it.
    #[arg(long, env = "PETSTORE_OPERATION_TIMEOUT_MS", default_value_t = 30_000)]
    operation_timeout_ms: u64,

    /// Fields resolved concurrently before new ones are shed.
    #[arg(long, env = "PETSTORE_MAX_CONCURRENT_OPERATIONS", default_value_t = 1000)]
    max_concurrent_operations: u32,

    #[arg(long, env = "PETSTORE_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// Allowed CORS origin; repeat for several. Defaults to any.
    #[arg(long = "cors-origin", env = "PETSTORE_CORS_ORIGINS", value_delimiter = ',')]
    cors_origins: Vec<String>,

    #[arg(
        long,
        env = "PETSTORE_LOG_FORMAT",
        value_enum,
        ignore_case = true,
        default_value_t = LogFormat::Text
    )]
    log_format: LogFormat,

    /// Also append request events as JSON lines to this file.
    #[arg(long, env = "PETSTORE_EVENT_LOG")]
    event_log: Option<PathBuf>,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "PETSTORE_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    if let Some(addr) = cli.metrics_addr {
        install_metrics_exporter(addr)?;
        info!(%addr, "metrics exporter listening");
    }

    let tracing_sink: Arc<dyn EventSink> = Arc::new(TracingEventSink);
    let mut sink = CompositeEventSink::new(vec![tracing_sink]);
    if let Some(path) = &cli.event_log {
        sink.push(Arc::new(JsonLinesEventSink::open(path)?));
        info!(path = %path.display(), "appending request events");
    }

    let server_config = ServerConfig {
        default_operation_timeout_ms: cli.operation_timeout_ms,
        max_concurrent_operations: cli.max_concurrent_operations,
    };
    let app = PetstoreApp::new(server_config, Arc::new(sink));

    let network_config = NetworkConfig {
        host: cli.host,
        port: cli.port,
        cors_origins: if cli.cors_origins.is_empty() {
            vec!["*".to_string()]
        } else {
            cli.cors_origins
        },
        request_timeout: Duration::from_secs(cli.request_timeout_secs),
        ..NetworkConfig::default()
    };

    let mut module = NetworkModule::new(network_config, app);
    let port = module.start().await?;
    info!(port, "petstore server started");

    module
        .serve(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
            }
            info!("shutdown requested");
        })
        .await
}
