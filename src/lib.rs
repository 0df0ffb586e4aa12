//! Prometheus queue-depth exporter for Celery brokers.
//!
//! This crate polls one or more message-queue brokers (Redis, Redis behind
//! Sentinel, RabbitMQ) for per-queue depth and liveness, and serves the
//! result as Prometheus text exposition over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Broker(s)      │<────│  QueueCollector │<────│  Polling loop   │
//! │  (redis/amqp)   │     │  (per cycle)    │     │  (interval)     │
//! └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!                                                          │ swap
//!                                                 ┌────────▼────────┐
//!                                                 │ Snapshot cache  │──> GET /metrics
//!                                                 └─────────────────┘
//! ```
//!
//! Scrape handlers only read the cached snapshot; broker latency never
//! reaches the HTTP path.
//!
//! # Usage
//!
//! ```bash
//! cq-exporter --config config.json5
//! ```
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod broker;
pub mod collector;
pub mod config;
pub mod exporter;
pub mod metrics;
pub mod queuespec;

pub use broker::{Broker, BrokerError, ConnectionInfo, QueueStats};
pub use collector::QueueCollector;
pub use config::ExporterConfig;
pub use exporter::{Exporter, MetricsSnapshot};
pub use metrics::{Collect, MetricFamily, Registry, Sample};
pub use queuespec::{MonitorSpec, format_monitor_queues, parse_monitor_queues};
