//! Pluggable storage backends for captured log records
//!
//! One contract, three backends: in-memory (no durability beyond the
//! process), embedded SQLite, and client-server PostgreSQL. Capture,
//! query, and cleanup paths all hold a single shared `Arc<dyn LogStore>`,
//! selected at construction from configuration, never by runtime type
//! inspection.

pub mod memory;
pub mod postgres;
pub(crate) mod sql;
pub mod sqlite;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use crate::config::{RetentionPolicy, StorageConfig};
use crate::error::Result;
use crate::filter::LogFilter;
use crate::record::LogRecord;
use async_trait::async_trait;
use std::sync::Arc;

/// Storage connector contract
///
/// Connection establishment is each backend's `connect()` constructor; a
/// failure there is an [`Error::Connection`](crate::Error::Connection) and
/// fatal to startup. All other operations are uniform across backends and
/// must follow identical filter semantics.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Ensure the schema exists; safe to call on every startup
    async fn init_db(&self) -> Result<()>;

    /// Persist one record and return the assigned id
    ///
    /// Ids are strictly increasing in save order within a connector
    /// instance; any id already present on the record is ignored.
    async fn save_log(&self, record: &LogRecord) -> Result<i64>;

    /// Fetch matching records, newest first, capped at `filter.limit`
    ///
    /// An empty result is `Ok(vec![])`, never an error.
    async fn fetch_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>>;

    /// Point lookup; absence is a normal outcome
    async fn fetch_log(&self, id: i64) -> Result<Option<LogRecord>>;

    /// Apply the retention policy: age-based eviction first, then the
    /// count cap (keep newest N). Returns the number of records removed;
    /// 0 when the policy is disabled.
    async fn cleanup(&self, policy: &RetentionPolicy) -> Result<u64>;

    /// Release backend resources; idempotent
    async fn disconnect(&self) -> Result<()>;
}

/// Connect the backend selected by configuration
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn LogStore>> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageConfig::Sqlite { path } => Ok(Arc::new(SqliteStore::connect(path).await?)),
        StorageConfig::Postgres { url } => Ok(Arc::new(PostgresStore::connect(url).await?)),
    }
}
