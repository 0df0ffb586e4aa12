//! Queue-depth collection: one pass over all configured brokers and queues.
//!
//! Failure isolation is first-class here: an unreachable broker costs only
//! its own queues for the cycle (and reports liveness 0), and a single
//! failing queue lookup is logged and skipped while the rest of the cycle
//! continues.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::broker::Broker;
use crate::metrics::{Collect, MetricFamily};
use crate::queuespec::MonitorSpec;

/// Collector that queries every configured broker for per-queue depth and
/// liveness each cycle.
pub struct QueueCollector {
    brokers: HashMap<u32, Box<dyn Broker>>,
    spec: MonitorSpec,
    prefix: String,
}

impl QueueCollector {
    /// Create a collector over one broker per monitored database.
    pub fn new(
        brokers: HashMap<u32, Box<dyn Broker>>,
        spec: MonitorSpec,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            brokers,
            spec,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl Collect for QueueCollector {
    async fn collect(&mut self) -> anyhow::Result<Vec<MetricFamily>> {
        let mut up = MetricFamily::gauge(
            format!("{}_broker_up", self.prefix),
            "Whether the exporter's connection to the broker is usable (1) or not (0).",
        );
        let mut length = MetricFamily::gauge(
            format!("{}_queue_length", self.prefix),
            "Number of messages currently in the queue.",
        );
        let mut consumers = MetricFamily::gauge(
            format!("{}_queue_consumers", self.prefix),
            "Number of consumers attached to the queue, where the backend reports it.",
        );
        let mut memory = MetricFamily::gauge(
            format!("{}_queue_memory_bytes", self.prefix),
            "Memory used by the queue in bytes, where the backend reports it.",
        );

        for (db, queues) in &self.spec {
            let Some(broker) = self.brokers.get_mut(db) else {
                warn!(db, "no broker configured for monitored database");
                continue;
            };

            let info = broker.connection_info();
            let broker_labels = vec![
                ("broker".to_string(), info.backend.to_string()),
                ("host".to_string(), info.host.clone()),
                ("port".to_string(), info.port.to_string()),
                ("db".to_string(), db.to_string()),
            ];

            if !broker.is_connected().await {
                if let Err(e) = broker.connect().await {
                    warn!(
                        db,
                        host = %info.host,
                        error = %e,
                        "broker unreachable, skipping its queues this cycle"
                    );
                    up.push(broker_labels, 0.0);
                    continue;
                }
            }
            up.push(broker_labels, 1.0);

            for queue in queues {
                match broker.get_queue_stats(queue).await {
                    Ok(stats) => {
                        debug!(db, queue = %queue, messages = stats.messages, "queue observed");
                        let labels = vec![
                            ("queue".to_string(), queue.clone()),
                            ("db".to_string(), db.to_string()),
                            ("broker".to_string(), info.backend.to_string()),
                        ];
                        length.push(labels.clone(), stats.messages as f64);
                        if let Some(count) = stats.consumers {
                            consumers.push(labels.clone(), count as f64);
                        }
                        if let Some(bytes) = stats.memory_bytes {
                            memory.push(labels, bytes as f64);
                        }
                    }
                    Err(e) => {
                        warn!(db, queue = %queue, error = %e, "queue query failed, skipping");
                    }
                }
            }
        }

        Ok(vec![up, length, consumers, memory])
    }
}
