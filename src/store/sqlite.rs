//! Embedded SQLite storage backend
//!
//! Async pool with WAL mode for concurrent reads/writes and a busy
//! timeout so a locked database waits instead of failing.

use crate::config::RetentionPolicy;
use crate::error::{Error, Result};
use crate::filter::LogFilter;
use crate::record::LogRecord;
use crate::store::sql::{self, SqlDialect, SqlParam};
use crate::store::LogStore;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`,
    /// e.g. `sqlite:logscope.db` or `sqlite::memory:`.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| Error::Connection(format!("invalid sqlite path {:?}: {}", path, e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        // A pooled in-memory database would open one empty database per
        // connection; pin it to a single connection.
        let max_connections = if path.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| Error::Connection(format!("failed to open sqlite database: {}", e)))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn init_db(&self) -> Result<()> {
        sqlx::query(sql::CREATE_TABLE_SQLITE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_log(&self, record: &LogRecord) -> Result<i64> {
        let result = sqlx::query(&sql::insert_sql(SqlDialect::Sqlite))
            .bind(&record.content)
            .bind(sql::datetime_to_epoch(record.timestamp))
            .bind(&record.method)
            .bind(&record.path)
            .bind(&record.url)
            .bind(encode_json(&record.headers)?)
            .bind(record.log_level.map(|l| l.as_str()))
            .bind(record.status_code)
            .bind(record.duration_ms)
            .bind(&record.client_ip)
            .bind(&record.user_agent)
            .bind(encode_json(&record.request_query)?)
            .bind(encode_json(&record.request_body)?)
            .bind(encode_json(&record.response_headers)?)
            .bind(encode_json(&record.response_body)?)
            .bind(record.response_size_bytes)
            .bind(&record.error_message)
            .bind(&record.stack_trace)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    async fn fetch_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>> {
        filter.validate()?;

        let (query_sql, params) = sql::select_sql(filter, SqlDialect::Sqlite);
        let mut query = sqlx::query(&query_sql);
        for param in &params {
            query = match param {
                SqlParam::Int(v) => query.bind(*v),
                SqlParam::Float(v) => query.bind(*v),
                SqlParam::Text(v) => query.bind(v.clone()),
            };
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn fetch_log(&self, id: i64) -> Result<Option<LogRecord>> {
        let row = sqlx::query(&sql::select_by_id_sql(SqlDialect::Sqlite))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn cleanup(&self, policy: &RetentionPolicy) -> Result<u64> {
        if !policy.enabled {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0u64;

        if policy.cleanup_older_than_hours > 0 {
            let cutoff = Utc::now() - ChronoDuration::hours(policy.cleanup_older_than_hours as i64);
            let result = sqlx::query(&sql::delete_older_than_sql(SqlDialect::Sqlite))
                .bind(sql::datetime_to_epoch(cutoff))
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }

        if policy.max_records > 0 {
            let result = sqlx::query(&sql::delete_excess_sql(SqlDialect::Sqlite))
                .bind(policy.max_records as i64)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }

    async fn disconnect(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn row_to_record(row: &SqliteRow) -> Result<LogRecord> {
    Ok(LogRecord {
        id: row.get("id"),
        content: row.get("content"),
        timestamp: sql::epoch_to_datetime(row.get::<f64, _>("timestamp")),
        method: row.get("method"),
        path: row.get("path"),
        url: row.get("url"),
        headers: decode_json(row.get("headers")),
        log_level: row
            .get::<Option<String>, _>("log_level")
            .and_then(|l| l.parse().ok()),
        status_code: row.get("status_code"),
        duration_ms: row.get("duration_ms"),
        client_ip: row.get("client_ip"),
        user_agent: row.get("user_agent"),
        request_query: decode_json(row.get("request_query")),
        request_body: decode_json(row.get("request_body")),
        response_headers: decode_json(row.get("response_headers")),
        response_body: decode_json(row.get("response_body")),
        response_size_bytes: row.get("response_size_bytes"),
        error_message: row.get("error_message"),
        stack_trace: row.get("stack_trace"),
    })
}

fn encode_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v))
        .transpose()
        .map_err(Error::from)
}

fn decode_json<T: serde::de::DeserializeOwned>(value: Option<String>) -> Option<T> {
    value.and_then(|raw| serde_json::from_str(&raw).ok())
}
