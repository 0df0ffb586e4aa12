//! Broker capability abstraction and backend factory.
//!
//! Backends expose very different introspection surfaces, so the contract
//! is intentionally minimal: queue depth plus best-effort extras. A backend
//! that cannot observe a dimension omits it rather than reporting a
//! sentinel value.

pub mod rabbitmq;
pub mod redis;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::BrokerConfig;

pub use self::rabbitmq::RabbitMqBroker;
pub use self::redis::{RedisBroker, RedisSentinelBroker};

/// Backend-type identifiers accepted by [`create_broker`].
pub const SUPPORTED_TYPES: &[&str] = &["redis", "redis-sentinel", "rabbitmq"];

/// Errors from broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("not connected to broker")]
    NotConnected,

    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("unsupported broker type '{requested}', supported types: {supported}")]
    UnknownType {
        requested: String,
        supported: String,
    },

    #[error("invalid broker configuration: {0}")]
    Config(String),
}

/// Read-only connection descriptor used for metric labeling. Available
/// without an active connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Backend type tag ("redis", "redis-sentinel", "rabbitmq").
    pub backend: &'static str,
    /// Host the adapter targets (for Sentinel, the first sentinel endpoint).
    pub host: String,
    /// Port the adapter targets.
    pub port: u16,
    /// Database index, for backends that have one.
    pub db: Option<i64>,
}

/// Per-queue dimensions a backend can report. `None` means the backend
/// cannot observe that dimension — callers must treat it as "not
/// applicable", never as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Number of messages waiting in the queue.
    pub messages: u64,
    /// Number of attached consumers, where the backend tracks them.
    pub consumers: Option<u64>,
    /// Memory used by the queue in bytes, where the backend reports it.
    pub memory_bytes: Option<u64>,
}

/// Capability interface implemented by every backend adapter.
///
/// Adapters are not required to be safe for concurrent use; the polling
/// loop is their sole caller.
#[async_trait]
pub trait Broker: Send {
    /// Establish the backend connection. On failure the broker is left
    /// disconnected with no half-open handles.
    async fn connect(&mut self) -> Result<(), BrokerError>;

    /// Release resources. Idempotent; safe when already disconnected.
    async fn disconnect(&mut self);

    /// Live connection probe. Re-validates with a ping-equivalent call so a
    /// stale handle cannot mask a dropped connection.
    async fn is_connected(&mut self) -> bool;

    /// Boolean liveness check that never errors.
    async fn ping(&mut self) -> bool;

    /// Connection descriptor for metric labeling.
    fn connection_info(&self) -> ConnectionInfo;

    /// Current depth of the named queue.
    async fn get_queue_length(&mut self, queue: &str) -> Result<u64, BrokerError>;

    /// Depth plus whatever extra dimensions the backend can report.
    async fn get_queue_stats(&mut self, queue: &str) -> Result<QueueStats, BrokerError>;

    /// Enumerate discoverable queues. Only used when explicit queue names
    /// are not configured; backends without an introspection plane may
    /// return [`BrokerError::Unsupported`].
    async fn list_queues(&mut self) -> Result<Vec<String>, BrokerError>;
}

/// Construct the adapter for a backend-type identifier, injecting the
/// per-database override. Unknown identifiers fail with an error naming the
/// supported set; this is a startup-time failure.
pub fn create_broker(
    broker_type: &str,
    config: &BrokerConfig,
    db: u32,
) -> Result<Box<dyn Broker>, BrokerError> {
    match broker_type.to_ascii_lowercase().as_str() {
        "redis" => Ok(Box::new(RedisBroker::new(config, db))),
        "redis-sentinel" => Ok(Box::new(RedisSentinelBroker::new(config, db)?)),
        "rabbitmq" => Ok(Box::new(RabbitMqBroker::new(config))),
        other => Err(BrokerError::UnknownType {
            requested: other.to_string(),
            supported: SUPPORTED_TYPES.join(", "),
        }),
    }
}
