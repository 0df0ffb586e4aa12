//! Redis broker adapters: direct connections and Sentinel-resolved masters.
//!
//! Celery queues on Redis are plain lists named after the queue, so depth
//! maps directly to `LLEN`. Memory usage comes from `MEMORY USAGE` where
//! the server supports it and degrades to "unavailable" where it does not.
//! Redis does not track consumers, so that dimension is never reported.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::sentinel::{SentinelClient, SentinelNodeConnectionInfo, SentinelServerType};
use redis::{ConnectionAddr, RedisConnectionInfo};
use tracing::{debug, info};

use super::{Broker, BrokerError, ConnectionInfo, QueueStats};
use crate::config::BrokerConfig;

/// Broker adapter for a direct Redis connection.
pub struct RedisBroker {
    host: String,
    port: u16,
    db: i64,
    password: Option<String>,
    socket_timeout: Duration,
    conn: Option<MultiplexedConnection>,
}

impl RedisBroker {
    /// Create a disconnected adapter for one database.
    pub fn new(config: &BrokerConfig, db: u32) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            db: i64::from(db),
            password: config.password.clone(),
            socket_timeout: Duration::from_secs_f64(config.socket_timeout_secs),
            conn: None,
        }
    }

    fn conn_mut(&mut self) -> Result<&mut MultiplexedConnection, BrokerError> {
        self.conn.as_mut().ok_or(BrokerError::NotConnected)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        let client = redis::Client::open(redis::ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                password: self.password.clone(),
                ..Default::default()
            },
        })?;

        let mut conn = client
            .get_multiplexed_async_connection_with_timeouts(
                self.socket_timeout,
                self.socket_timeout,
            )
            .await?;

        // Round-trip before declaring the connection usable.
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!(
            host = %self.host,
            port = self.port,
            db = self.db,
            "connected to redis"
        );
        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            debug!(host = %self.host, port = self.port, "disconnected from redis");
        }
    }

    async fn is_connected(&mut self) -> bool {
        self.ping().await
    }

    async fn ping(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => ping(conn).await,
            None => false,
        }
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            backend: "redis",
            host: self.host.clone(),
            port: self.port,
            db: Some(self.db),
        }
    }

    async fn get_queue_length(&mut self, queue: &str) -> Result<u64, BrokerError> {
        queue_length(self.conn_mut()?, queue).await
    }

    async fn get_queue_stats(&mut self, queue: &str) -> Result<QueueStats, BrokerError> {
        queue_stats(self.conn_mut()?, queue).await
    }

    async fn list_queues(&mut self) -> Result<Vec<String>, BrokerError> {
        list_queues(self.conn_mut()?).await
    }
}

/// Broker adapter that resolves the current master through Redis Sentinel.
///
/// The sentinel quorum is consulted at `connect` time only; the resolved
/// master connection is then used exactly like a direct one. A failover is
/// picked up by the next reconnect, not tracked live.
pub struct RedisSentinelBroker {
    sentinel_hosts: Vec<String>,
    master_name: String,
    sentinel_password: Option<String>,
    db: i64,
    password: Option<String>,
    conn: Option<MultiplexedConnection>,
}

impl RedisSentinelBroker {
    /// Create a disconnected adapter for one database. Fails when the
    /// sentinel settings are missing or incomplete.
    pub fn new(config: &BrokerConfig, db: u32) -> Result<Self, BrokerError> {
        let sentinel = config.sentinel.as_ref().ok_or_else(|| {
            BrokerError::Config(
                "sentinel settings are required for broker type 'redis-sentinel'".to_string(),
            )
        })?;

        if sentinel.hosts.is_empty() {
            return Err(BrokerError::Config(
                "at least one sentinel host is required".to_string(),
            ));
        }
        if sentinel.master_name.is_empty() {
            return Err(BrokerError::Config(
                "sentinel master name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            sentinel_hosts: sentinel.hosts.clone(),
            master_name: sentinel.master_name.clone(),
            sentinel_password: sentinel.password.clone(),
            db: i64::from(db),
            password: config.password.clone(),
            conn: None,
        })
    }

    fn sentinel_urls(&self) -> Vec<String> {
        self.sentinel_hosts
            .iter()
            .map(|host| {
                let (host, port) = split_host_port(host);
                match &self.sentinel_password {
                    Some(password) => format!("redis://:{}@{}:{}", password, host, port),
                    None => format!("redis://{}:{}", host, port),
                }
            })
            .collect()
    }
}

#[async_trait]
impl Broker for RedisSentinelBroker {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        // A fresh sentinel client per attempt also re-reads the sentinel
        // list after a failover.
        let mut client = SentinelClient::build(
            self.sentinel_urls(),
            self.master_name.clone(),
            Some(SentinelNodeConnectionInfo {
                tls_mode: None,
                redis_connection_info: Some(RedisConnectionInfo {
                    db: self.db,
                    password: self.password.clone(),
                    ..Default::default()
                }),
            }),
            SentinelServerType::Master,
        )?;

        let mut conn = client.get_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!(
            master = %self.master_name,
            db = self.db,
            "connected to redis master via sentinel"
        );
        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            debug!(master = %self.master_name, "disconnected from redis master");
        }
    }

    async fn is_connected(&mut self) -> bool {
        self.ping().await
    }

    async fn ping(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => ping(conn).await,
            None => false,
        }
    }

    fn connection_info(&self) -> ConnectionInfo {
        let (host, port) = split_host_port(&self.sentinel_hosts[0]);
        ConnectionInfo {
            backend: "redis-sentinel",
            host,
            port,
            db: Some(self.db),
        }
    }

    async fn get_queue_length(&mut self, queue: &str) -> Result<u64, BrokerError> {
        let conn = self.conn.as_mut().ok_or(BrokerError::NotConnected)?;
        queue_length(conn, queue).await
    }

    async fn get_queue_stats(&mut self, queue: &str) -> Result<QueueStats, BrokerError> {
        let conn = self.conn.as_mut().ok_or(BrokerError::NotConnected)?;
        queue_stats(conn, queue).await
    }

    async fn list_queues(&mut self) -> Result<Vec<String>, BrokerError> {
        let conn = self.conn.as_mut().ok_or(BrokerError::NotConnected)?;
        list_queues(conn).await
    }
}

async fn ping(conn: &mut MultiplexedConnection) -> bool {
    let pong: Result<String, _> = redis::cmd("PING").query_async(conn).await;
    pong.is_ok()
}

async fn queue_length(conn: &mut MultiplexedConnection, queue: &str) -> Result<u64, BrokerError> {
    let length: u64 = redis::cmd("LLEN").arg(queue).query_async(conn).await?;
    Ok(length)
}

async fn queue_stats(conn: &mut MultiplexedConnection, queue: &str) -> Result<QueueStats, BrokerError> {
    let messages = queue_length(conn, queue).await?;
    Ok(QueueStats {
        messages,
        // Redis does not track consumers.
        consumers: None,
        memory_bytes: memory_usage(conn, queue).await,
    })
}

/// `MEMORY USAGE` needs Redis >= 4.0 and may be disabled; treat any failure
/// as "unavailable" rather than failing the queue lookup.
async fn memory_usage(conn: &mut MultiplexedConnection, queue: &str) -> Option<u64> {
    let result: Result<Option<u64>, _> = redis::cmd("MEMORY")
        .arg("USAGE")
        .arg(queue)
        .query_async(conn)
        .await;

    match result {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(queue, error = %e, "MEMORY USAGE unavailable");
            None
        }
    }
}

/// Queues are list-typed keys; everything else in the database is Celery
/// bookkeeping.
async fn list_queues(conn: &mut MultiplexedConnection) -> Result<Vec<String>, BrokerError> {
    let keys: Vec<String> = redis::cmd("KEYS").arg("*").query_async(conn).await?;

    let mut queues = Vec::new();
    for key in keys {
        let kind: String = redis::cmd("TYPE").arg(&key).query_async(conn).await?;
        if kind == "list" {
            queues.push(key);
        }
    }

    queues.sort();
    Ok(queues)
}

fn split_host_port(endpoint: &str) -> (String, u16) {
    match endpoint.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (endpoint.to_string(), 26379),
        },
        None => (endpoint.to_string(), 26379),
    }
}
