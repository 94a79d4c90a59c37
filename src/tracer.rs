//! Top-level assembly
//!
//! `Tracer` owns the injected parts (store, broadcaster, metrics), wires
//! them together at construction, and hands the host application a capture
//! layer plus a mountable API router. No global state: every component
//! receives its collaborators explicitly.

use crate::api::{self, ApiState};
use crate::broadcast::LogBroadcaster;
use crate::capture::{self, CaptureState};
use crate::cleanup;
use crate::config::TracerConfig;
use crate::error::Result;
use crate::metrics::MetricsService;
use crate::store::{self, LogStore};
use crate::telemetry;
use axum::{middleware, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct Tracer {
    config: TracerConfig,
    store: Arc<dyn LogStore>,
    broadcaster: Arc<LogBroadcaster>,
    metrics: Arc<MetricsService>,
    prometheus: Arc<PrometheusHandle>,
    cleanup_handle: Option<JoinHandle<()>>,
}

impl Tracer {
    /// Validate configuration, connect and initialize the storage backend
    /// (fatal on failure), and spawn the retention scheduler when enabled.
    pub async fn new(config: TracerConfig) -> Result<Self> {
        config.validate()?;

        let store = store::connect(&config.storage).await?;
        store.init_db().await?;

        let broadcaster = Arc::new(LogBroadcaster::new());
        let metrics = Arc::new(MetricsService::new(&config.metrics));
        let prometheus = Arc::new(telemetry::init_metrics());
        let cleanup_handle =
            cleanup::spawn_cleanup_task(store.clone(), config.retention.clone());

        tracing::info!(
            mount_path = %config.api.mount_path,
            retention = config.retention.enabled,
            "tracer initialized"
        );

        Ok(Self {
            config,
            store,
            broadcaster,
            metrics,
            prometheus,
            cleanup_handle,
        })
    }

    /// Attach the capture middleware and the API router to a host app
    ///
    /// Call this after the host's own routes are registered so that all of
    /// them are traced. The tracer's routes sit under
    /// `config.api.mount_path` and are skipped by capture unless
    /// `save_own_traces` is set.
    pub fn attach(&self, app: Router) -> Router {
        let app = if self.config.api.enabled {
            app.nest(&self.config.api.mount_path, self.router())
        } else {
            app
        };
        app.layer(middleware::from_fn_with_state(
            self.capture_state(),
            capture::trace_requests,
        ))
    }

    /// The mountable API router, for hosts that nest it themselves
    pub fn router(&self) -> Router {
        api::router(ApiState {
            store: self.store.clone(),
            broadcaster: self.broadcaster.clone(),
            metrics: self.metrics.clone(),
            prometheus: self.prometheus.clone(),
            api_key: self.config.api.api_key.clone(),
        })
    }

    /// State for `axum::middleware::from_fn_with_state(_, trace_requests)`
    pub fn capture_state(&self) -> CaptureState {
        CaptureState {
            store: self.store.clone(),
            broadcaster: self.broadcaster.clone(),
            metrics: self.metrics.clone(),
            config: self.config.capture.clone(),
            mount_path: self.config.api.mount_path.clone(),
        }
    }

    pub fn store(&self) -> Arc<dyn LogStore> {
        self.store.clone()
    }

    pub fn broadcaster(&self) -> Arc<LogBroadcaster> {
        self.broadcaster.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsService> {
        self.metrics.clone()
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Stop the retention scheduler and release the storage backend
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(handle) = self.cleanup_handle.take() {
            handle.abort();
        }
        self.store.disconnect().await
    }
}
