//! Queue-depth exporter binary.

use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use cq_exporter::broker::{self, Broker};
use cq_exporter::collector::QueueCollector;
use cq_exporter::config::{ExporterConfig, LogFormat};
use cq_exporter::exporter::Exporter;
use cq_exporter::metrics::Registry;
use cq_exporter::queuespec;

/// Export Celery queue depth as Prometheus metrics.
#[derive(Parser, Debug)]
#[command(name = "cq-exporter")]
#[command(about = "Export Celery queue depth as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)?,
        None => ExporterConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("cq_exporter={}", log_level).parse()?)
        .add_directive(format!("lapin={}", Level::WARN).parse()?);

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    info!("starting queue-depth exporter");

    let spec = queuespec::parse_monitor_queues(&config.monitor_queues);
    if spec.is_empty() {
        anyhow::bail!(
            "monitor_queues '{}' contains no valid entries",
            config.monitor_queues
        );
    }
    info!(
        spec = %queuespec::format_monitor_queues(&spec),
        broker = %config.broker.broker_type,
        "resolved monitor-queues"
    );

    // One broker per monitored database. Startup connectivity is fatal: the
    // exporter cannot serve meaningful metrics without a reachable broker.
    let mut brokers: HashMap<u32, Box<dyn Broker>> = HashMap::new();
    for db in spec.keys() {
        let mut broker = broker::create_broker(&config.broker.broker_type, &config.broker, *db)?;
        broker.connect().await.map_err(|e| {
            anyhow::anyhow!(
                "initial connection to {} broker for db {} failed: {}",
                config.broker.broker_type,
                db,
                e
            )
        })?;
        brokers.insert(*db, broker);
    }

    let mut registry = Registry::new();
    registry.register(Box::new(QueueCollector::new(
        brokers,
        spec,
        config.prefix.clone(),
    )));

    let listen_addr: std::net::SocketAddr = config
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address '{}': {}", config.listen, e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut exporter = Exporter::new(
        Duration::from_secs(config.polling_interval_secs),
        config.path.clone(),
    );
    let polling_task = exporter.start_polling(registry, shutdown_rx.clone())?;

    // Bind before spawning so a port conflict fails startup instead of
    // leaving the exporter silently unscrapable.
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind metrics server to {}: {}", listen_addr, e))?;
    info!(addr = %listen_addr, path = %config.path, "metrics server listening");

    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = exporter.serve(listener, http_shutdown).await {
            error!(error = %e, "metrics server error");
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).unwrap();
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("received SIGTERM, shutting down...");
        }
    }

    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = polling_task.await;
        let _ = http_task.await;
    })
    .await;

    info!("exporter stopped");
    Ok(())
}
