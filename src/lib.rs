//! logscope: embeddable request-tracing middleware for axum
//!
//! Captures one structured log record per request flowing through a host
//! application, persists it through a pluggable storage backend, fans new
//! records out to live subscribers, aggregates rolling-window metrics, and
//! serves a queryable JSON/SSE API.
//!
//! ## Architecture
//!
//! ```text
//! request -> capture middleware -> store (save, assigns id)
//!                                -> broadcaster (live fan-out)
//!                                -> metrics (rolling aggregation)
//! retention scheduler -> store.cleanup()   (independent background task)
//! query API           -> store.fetch_*()  / metrics getters / SSE feed
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let tracer = logscope::Tracer::new(TracerConfig::default()).await?;
//! let app = Router::new().route("/", get(handler));
//! let app = tracer.attach(app);
//! axum::serve(listener, app).await?;
//! ```

pub mod api;
pub mod broadcast;
pub mod capture;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod record;
pub mod store;
pub mod telemetry;
pub mod tracer;

pub use broadcast::LogBroadcaster;
// `self::` disambiguates from the config/metrics crates
pub use self::config::{RetentionPolicy, StorageConfig, TracerConfig};
pub use self::metrics::MetricsService;
pub use error::{Error, Result};
pub use filter::LogFilter;
pub use record::{LogLevel, LogRecord};
pub use store::LogStore;
pub use tracer::Tracer;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging for hosts that have not set up their own
/// subscriber. Can only be called once per process.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
