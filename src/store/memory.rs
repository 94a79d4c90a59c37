//! In-memory storage backend
//!
//! Ordered `Vec` for scans plus an id-indexed map for O(1) point lookup,
//! both guarded by one coarse mutex shared across reads and writes.
//! Filtering delegates to the same `filter::matches` predicate the live
//! feed uses, so semantics stay identical to the SQL backends.

use crate::config::RetentionPolicy;
use crate::error::Result;
use crate::filter::{matches, LogFilter};
use crate::record::LogRecord;
use crate::store::LogStore;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    logs: Vec<LogRecord>,
    logs_by_id: HashMap<i64, LogRecord>,
    next_id: i64,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                logs: Vec::new(),
                logs_by_id: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicked holder cannot leave the two collections inconsistent
        // with each other (both are updated before any panic point), so
        // recover rather than poison every later caller.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn init_db(&self) -> Result<()> {
        Ok(())
    }

    async fn save_log(&self, record: &LogRecord) -> Result<i64> {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        let stored = record.clone().with_id(id);
        inner.logs.push(stored.clone());
        inner.logs_by_id.insert(id, stored);
        Ok(id)
    }

    async fn fetch_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>> {
        filter.validate()?;

        let inner = self.lock();
        let mut hits: Vec<LogRecord> = inner
            .logs
            .iter()
            .filter(|log| matches(log, filter))
            .cloned()
            .collect();

        // Newest first, id breaks ties deterministically
        hits.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        hits.truncate(filter.limit);
        Ok(hits)
    }

    async fn fetch_log(&self, id: i64) -> Result<Option<LogRecord>> {
        Ok(self.lock().logs_by_id.get(&id).cloned())
    }

    async fn cleanup(&self, policy: &RetentionPolicy) -> Result<u64> {
        if !policy.enabled {
            return Ok(0);
        }

        let mut inner = self.lock();
        let initial = inner.logs.len();

        // Age-based eviction runs before the count cap
        if policy.cleanup_older_than_hours > 0 {
            let cutoff = Utc::now() - Duration::hours(policy.cleanup_older_than_hours as i64);
            inner.logs.retain(|log| log.timestamp >= cutoff);
        }

        if policy.max_records > 0 && inner.logs.len() > policy.max_records as usize {
            let mut by_recency: Vec<(chrono::DateTime<Utc>, i64)> = inner
                .logs
                .iter()
                .map(|log| (log.timestamp, log.id))
                .collect();
            by_recency.sort_by(|a, b| b.cmp(a));
            let keep: std::collections::HashSet<i64> = by_recency
                .into_iter()
                .take(policy.max_records as usize)
                .map(|(_, id)| id)
                .collect();
            inner.logs.retain(|log| keep.contains(&log.id));
        }

        if inner.logs.len() < initial {
            inner.logs_by_id = inner
                .logs
                .iter()
                .map(|log| (log.id, log.clone()))
                .collect();
        }

        Ok((initial - inner.logs.len()) as u64)
    }

    async fn disconnect(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.logs.clear();
        inner.logs_by_id.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content: &str, status: i32) -> LogRecord {
        let mut r = LogRecord::new(content);
        r.status_code = Some(status);
        r
    }

    #[tokio::test]
    async fn test_save_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let a = store.save_log(&record("A", 200)).await.unwrap();
        let b = store.save_log(&record("B", 200)).await.unwrap();
        assert!(b > a);

        // Caller-supplied id is ignored
        let mut fake = record("C", 200);
        fake.id = 999;
        let c = store.save_log(&fake).await.unwrap();
        assert_eq!(c, b + 1);
        assert!(store.fetch_log(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_logs_newest_first_with_limit() {
        let store = MemoryStore::new();
        for content in ["A", "B", "C"] {
            store.save_log(&record(content, 200)).await.unwrap();
        }

        let filter = LogFilter {
            limit: 2,
            ..Default::default()
        };
        let logs = store.fetch_logs(&filter).await.unwrap();
        let contents: Vec<&str> = logs.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["C", "B"]);
    }

    #[tokio::test]
    async fn test_fetch_log_absent_is_none() {
        let store = MemoryStore::new();
        assert!(store.fetch_log(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_logs_empty_match_is_empty_vec() {
        let store = MemoryStore::new();
        store.save_log(&record("A", 200)).await.unwrap();

        let filter = LogFilter {
            status_code: Some("404".to_string()),
            ..Default::default()
        };
        assert!(store.fetch_logs(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_disabled_is_noop() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.save_log(&record(&format!("r{}", i), 200)).await.unwrap();
        }
        let policy = RetentionPolicy {
            enabled: false,
            max_records: 1,
            ..Default::default()
        };
        assert_eq!(store.cleanup(&policy).await.unwrap(), 0);
        assert_eq!(
            store.fetch_logs(&LogFilter { limit: 100, ..Default::default() }).await.unwrap().len(),
            10
        );
    }

    #[tokio::test]
    async fn test_cleanup_max_records_keeps_newest_and_is_idempotent() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.save_log(&record(&format!("r{}", i), 200)).await.unwrap();
        }

        let policy = RetentionPolicy {
            enabled: true,
            max_records: 5,
            cleanup_older_than_hours: 0,
            ..Default::default()
        };
        assert_eq!(store.cleanup(&policy).await.unwrap(), 5);

        let remaining = store
            .fetch_logs(&LogFilter { limit: 100, ..Default::default() })
            .await
            .unwrap();
        let contents: Vec<&str> = remaining.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["r9", "r8", "r7", "r6", "r5"]);

        // Evicted ids disappear from point lookup too
        assert!(store.fetch_log(1).await.unwrap().is_none());
        assert!(store.fetch_log(10).await.unwrap().is_some());

        assert_eq!(store.cleanup(&policy).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_age_applied_before_count() {
        let store = MemoryStore::new();
        let mut old = record("old", 200);
        old.timestamp = Utc::now() - Duration::hours(48);
        store.save_log(&old).await.unwrap();
        for i in 0..3 {
            store.save_log(&record(&format!("fresh{}", i), 200)).await.unwrap();
        }

        let policy = RetentionPolicy {
            enabled: true,
            max_records: 3,
            cleanup_older_than_hours: 24,
            ..Default::default()
        };
        // The stale record is removed by age, which already satisfies the cap
        assert_eq!(store.cleanup(&policy).await.unwrap(), 1);
        let remaining = store
            .fetch_logs(&LogFilter { limit: 100, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.iter().all(|l| l.content.starts_with("fresh")));
    }

    #[tokio::test]
    async fn test_disconnect_clears_state() {
        let store = MemoryStore::new();
        store.save_log(&record("A", 200)).await.unwrap();
        store.disconnect().await.unwrap();
        assert!(store
            .fetch_logs(&LogFilter::default())
            .await
            .unwrap()
            .is_empty());
    }
}
