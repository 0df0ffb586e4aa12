//! Background polling loop, snapshot cache, and HTTP serving.
//!
//! Two cooperating activities share one snapshot: the polling loop replaces
//! it wholesale after each collection cycle, and scrape handlers read it.
//! The lock is held only for the Arc clone/swap, never across I/O, so a
//! slow broker never shows up in scrape latency.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::metrics::{self, Registry};

/// Content type for the Prometheus text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// The serialized result of one complete collection cycle.
#[derive(Debug)]
pub struct MetricsSnapshot {
    /// Rendered exposition text.
    pub body: String,
    /// When this snapshot was produced.
    pub produced_at: SystemTime,
}

impl MetricsSnapshot {
    /// An empty but valid exposition body, served until the first cycle
    /// completes.
    fn empty() -> Self {
        Self {
            body: String::new(),
            produced_at: SystemTime::now(),
        }
    }
}

type SharedSnapshot = Arc<RwLock<Arc<MetricsSnapshot>>>;

/// Owns the cached snapshot and the polling/serving pipeline around it.
pub struct Exporter {
    snapshot: SharedSnapshot,
    polling_interval: Duration,
    metrics_path: String,
    polling_started: bool,
}

impl Exporter {
    /// Create an exporter with an empty initial snapshot.
    pub fn new(polling_interval: Duration, metrics_path: impl Into<String>) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(Arc::new(MetricsSnapshot::empty()))),
            polling_interval,
            metrics_path: metrics_path.into(),
            polling_started: false,
        }
    }

    /// The most recent complete snapshot.
    pub fn snapshot(&self) -> Arc<MetricsSnapshot> {
        self.snapshot.read().clone()
    }

    /// Start the background polling loop. The registry moves into the loop,
    /// which is its sole caller from here on. At most one polling loop may
    /// run per exporter instance.
    pub fn start_polling(
        &mut self,
        mut registry: Registry,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<JoinHandle<()>> {
        if self.polling_started {
            anyhow::bail!("polling loop already started for this exporter");
        }
        self.polling_started = true;

        let snapshot = self.snapshot.clone();
        let interval = self.polling_interval;

        info!(interval_secs = interval.as_secs(), "starting polling loop");
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match registry.gather().await {
                            Ok(families) => {
                                let body = metrics::encode(&families);
                                let next = Arc::new(MetricsSnapshot {
                                    body,
                                    produced_at: SystemTime::now(),
                                });
                                *snapshot.write() = next;
                            }
                            Err(e) => {
                                // Keep serving the previous snapshot.
                                error!(error = %e, "metrics collection failed");
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("polling loop stopped");
        });

        Ok(handle)
    }

    /// Router serving the cached snapshot. Handlers never trigger a fresh
    /// collection.
    pub fn router(&self) -> Router {
        create_router(self.snapshot.clone(), &self.metrics_path)
    }

    /// Serve scrape requests on an already-bound listener until the
    /// shutdown signal flips.
    pub async fn serve(
        &self,
        listener: tokio::net::TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = self.router();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("metrics server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("metrics server error: {}", e))?;

        info!("metrics server stopped");
        Ok(())
    }
}

#[derive(Clone)]
struct AppState {
    snapshot: SharedSnapshot,
}

fn create_router(snapshot: SharedSnapshot, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(metrics_handler))
        .fallback(not_found_handler)
        .layer(CorsLayer::permissive())
        .with_state(AppState { snapshot })
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.snapshot.read().clone();

    (
        StatusCode::OK,
        [("content-type", CONTENT_TYPE)],
        snapshot.body.clone(),
    )
        .into_response()
}

async fn not_found_handler() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}
