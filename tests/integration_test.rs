//! Integration tests for the queue-depth exporter.
//!
//! These cover the full pipeline: broker queries through the collector and
//! registry, snapshot replacement by the polling loop, and the HTTP
//! /metrics endpoint serving cached bytes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use parking_lot::Mutex;
use tokio::sync::watch;
use tower::ServiceExt;

use cq_exporter::broker::{Broker, BrokerError, ConnectionInfo, QueueStats};
use cq_exporter::collector::QueueCollector;
use cq_exporter::exporter::Exporter;
use cq_exporter::metrics::{Collect, MetricFamily, Registry};
use cq_exporter::queuespec::parse_monitor_queues;

/// In-memory broker backed by a shared queue map, so tests can reseed
/// depths while the polling loop runs.
struct FakeBroker {
    queues: Arc<Mutex<HashMap<String, u64>>>,
    reachable: Arc<AtomicBool>,
    connected: bool,
}

impl FakeBroker {
    fn new(queues: &[(&str, u64)]) -> Self {
        Self {
            queues: Arc::new(Mutex::new(
                queues
                    .iter()
                    .map(|(name, depth)| (name.to_string(), *depth))
                    .collect(),
            )),
            reachable: Arc::new(AtomicBool::new(true)),
            connected: false,
        }
    }

    fn queues_handle(&self) -> Arc<Mutex<HashMap<String, u64>>> {
        self.queues.clone()
    }

    fn reachable_handle(&self) -> Arc<AtomicBool> {
        self.reachable.clone()
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        if self.reachable.load(Ordering::SeqCst) {
            self.connected = true;
            Ok(())
        } else {
            self.connected = false;
            Err(BrokerError::NotConnected)
        }
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    async fn is_connected(&mut self) -> bool {
        self.connected && self.reachable.load(Ordering::SeqCst)
    }

    async fn ping(&mut self) -> bool {
        self.is_connected().await
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            backend: "fake",
            host: "fake.internal".to_string(),
            port: 6379,
            db: Some(0),
        }
    }

    async fn get_queue_length(&mut self, queue: &str) -> Result<u64, BrokerError> {
        Ok(self.get_queue_stats(queue).await?.messages)
    }

    async fn get_queue_stats(&mut self, queue: &str) -> Result<QueueStats, BrokerError> {
        if !self.connected || !self.reachable.load(Ordering::SeqCst) {
            return Err(BrokerError::NotConnected);
        }
        Ok(QueueStats {
            messages: self.queues.lock().get(queue).copied().unwrap_or(0),
            consumers: None,
            memory_bytes: None,
        })
    }

    async fn list_queues(&mut self) -> Result<Vec<String>, BrokerError> {
        let mut queues: Vec<String> = self.queues.lock().keys().cloned().collect();
        queues.sort();
        Ok(queues)
    }
}

fn registry_over(broker: FakeBroker, spec: &str) -> Registry {
    let mut brokers: HashMap<u32, Box<dyn Broker>> = HashMap::new();
    brokers.insert(0, Box::new(broker));

    let mut registry = Registry::new();
    registry.register(Box::new(QueueCollector::new(
        brokers,
        parse_monitor_queues(spec),
        "celery",
    )));
    registry
}

async fn scrape(exporter: &Exporter) -> String {
    let response = exporter
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_end_to_end_queue_depths_are_served() {
    let broker = FakeBroker::new(&[("orders", 3), ("emails", 0)]);
    let registry = registry_over(broker, "0:orders,emails");

    let mut exporter = Exporter::new(Duration::from_millis(20), "/metrics");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = exporter.start_polling(registry, shutdown_rx).unwrap();

    // Give the loop at least one full polling interval.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let body = scrape(&exporter).await;

    assert!(
        body.contains("celery_queue_length{queue=\"orders\",db=\"0\",broker=\"fake\"} 3"),
        "missing orders depth in:\n{body}"
    );
    assert!(
        body.contains("celery_queue_length{queue=\"emails\",db=\"0\",broker=\"fake\"} 0"),
        "missing emails depth in:\n{body}"
    );
    assert!(
        body.contains("celery_broker_up{broker=\"fake\",host=\"fake.internal\",port=\"6379\",db=\"0\"} 1"),
        "missing liveness gauge in:\n{body}"
    );
    assert!(body.contains("# TYPE celery_queue_length gauge"));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_scrape_before_first_cycle_is_empty_but_valid() {
    let exporter = Exporter::new(Duration::from_secs(30), "/metrics");

    let body = scrape(&exporter).await;

    assert!(body.is_empty());
}

#[tokio::test]
async fn test_depth_changes_appear_after_next_cycle() {
    let broker = FakeBroker::new(&[("orders", 1)]);
    let queues = broker.queues_handle();
    let registry = registry_over(broker, "0:orders");

    let mut exporter = Exporter::new(Duration::from_millis(20), "/metrics");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = exporter.start_polling(registry, shutdown_rx).unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(scrape(&exporter).await.contains("queue=\"orders\",db=\"0\",broker=\"fake\"} 1"));

    queues.lock().insert("orders".to_string(), 9);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(scrape(&exporter).await.contains("queue=\"orders\",db=\"0\",broker=\"fake\"} 9"));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_liveness_flips_and_recovers_without_restart() {
    let broker = FakeBroker::new(&[("orders", 3)]);
    let reachable = broker.reachable_handle();
    let registry = registry_over(broker, "0:orders");

    let mut exporter = Exporter::new(Duration::from_millis(20), "/metrics");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = exporter.start_polling(registry, shutdown_rx).unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    let body = scrape(&exporter).await;
    assert!(body.contains("celery_broker_up{") && body.contains("} 1"));
    assert!(body.contains("celery_queue_length{"));

    // Broker goes away: liveness drops to 0 and queue depths disappear.
    reachable.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;
    let body = scrape(&exporter).await;
    assert!(body.contains("} 0"), "liveness should be 0 in:\n{body}");
    assert!(
        !body.contains("celery_queue_length{"),
        "no depths while the broker is down:\n{body}"
    );

    // Broker returns: the next cycle reconnects and depths resume.
    reachable.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;
    let body = scrape(&exporter).await;
    assert!(body.contains("celery_broker_up{") && body.contains("} 1"));
    assert!(body.contains("celery_queue_length{queue=\"orders\""));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

/// Collector whose two families carry the same cycle counter, so a torn
/// snapshot would be observable as a mismatch.
struct PairedCollector {
    cycle: u64,
}

#[async_trait]
impl Collect for PairedCollector {
    async fn collect(&mut self) -> anyhow::Result<Vec<MetricFamily>> {
        self.cycle += 1;
        let mut first = MetricFamily::gauge("pair_first", "First half of the pair.");
        first.push(Vec::new(), self.cycle as f64);
        let mut second = MetricFamily::gauge("pair_second", "Second half of the pair.");
        second.push(Vec::new(), self.cycle as f64);
        Ok(vec![first, second])
    }
}

#[tokio::test]
async fn test_concurrent_scrapes_observe_complete_snapshots() {
    let mut registry = Registry::new();
    registry.register(Box::new(PairedCollector { cycle: 0 }));

    let mut exporter = Exporter::new(Duration::from_millis(5), "/metrics");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = exporter.start_polling(registry, shutdown_rx).unwrap();

    fn gauge_value(body: &str, name: &str) -> Option<f64> {
        body.lines()
            .find(|line| line.starts_with(name) && !line.starts_with('#'))
            .and_then(|line| line.split_whitespace().last())
            .and_then(|value| value.parse().ok())
    }

    for _ in 0..50 {
        let body = scrape(&exporter).await;
        if body.is_empty() {
            continue;
        }
        let first = gauge_value(&body, "pair_first");
        let second = gauge_value(&body, "pair_second");
        assert_eq!(
            first, second,
            "scrape observed a torn snapshot:\n{body}"
        );
    }

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_serving_over_real_listener() {
    let broker = FakeBroker::new(&[("orders", 2)]);
    let registry = registry_over(broker, "0:orders");

    let mut exporter = Exporter::new(Duration::from_millis(20), "/metrics");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let polling = exporter.start_polling(registry, shutdown_rx.clone()).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        exporter.serve(listener, shutdown_rx).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(80)).await;

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(
        &mut stream,
        b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await
    .unwrap();
    let mut response = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut response)
        .await
        .unwrap();
    let response = String::from_utf8(response).unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("celery_queue_length"));

    shutdown_tx.send(true).unwrap();
    polling.await.unwrap();
    server.await.unwrap();
}
