//! Filter specification and the in-memory filter engine
//!
//! `matches()` is the canonical predicate: the memory backend evaluates it
//! directly and the live SSE feed uses it to decide whether a new record
//! belongs to a subscriber's filtered view. The SQL WHERE-clause
//! translation in `store::sql` is kept behaviourally identical; the
//! backend-parity integration tests pin the two together.

use crate::error::{Error, Result};
use crate::record::LogRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel log-level value meaning "no level constraint"
pub const ALL_LEVELS: &str = "All Levels";

pub const DEFAULT_LIMIT: usize = 20;

/// Caller-supplied query restricting which log records are returned
///
/// Every field is optional; absence imposes no constraint on that
/// dimension. Results are always newest-first by timestamp (ties broken by
/// id descending) and capped at `limit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFilter {
    pub limit: usize,
    /// Case-insensitive substring match against `content`
    pub search_text: Option<String>,
    /// Case-insensitive substring match against `url` or `path`
    pub endpoint: Option<String>,
    /// Exact numeric string, or wildcard pattern like `2XX`
    pub status_code: Option<String>,
    /// Exact match; the sentinel "All Levels" disables the constraint
    pub log_level: Option<String>,
    /// Match any of the listed methods
    pub methods: Option<Vec<String>>,
    /// Inclusive lower bound on `duration_ms` (missing duration counts as 0)
    pub min_latency: Option<i64>,
    /// Inclusive upper bound on `duration_ms`
    pub max_latency: Option<i64>,
    /// Restrict to error records (status >= 400 or non-empty error message)
    pub has_error: Option<bool>,
    /// Inclusive lower timestamp bound
    pub start_date: Option<DateTime<Utc>>,
    /// Exclusive upper timestamp bound
    pub end_date: Option<DateTime<Utc>>,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            search_text: None,
            endpoint: None,
            status_code: None,
            log_level: None,
            methods: None,
            min_latency: None,
            max_latency: None,
            has_error: None,
            start_date: None,
            end_date: None,
        }
    }
}

impl LogFilter {
    /// Reject malformed filters before they reach storage
    pub fn validate(&self) -> Result<()> {
        if self.min_latency.is_some_and(|v| v < 0) || self.max_latency.is_some_and(|v| v < 0) {
            return Err(Error::Validation("latency bounds must be non-negative".into()));
        }
        if let (Some(min), Some(max)) = (self.min_latency, self.max_latency) {
            if min > max {
                return Err(Error::Validation(format!(
                    "min_latency {} exceeds max_latency {}",
                    min, max
                )));
            }
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start >= end {
                return Err(Error::Validation("start_date must precede end_date".into()));
            }
        }
        Ok(())
    }
}

/// Parsed form of a status-code filter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StatusPattern {
    /// Empty value, no constraint
    Any,
    /// All-digit value, exact match
    Exact(i32),
    /// Wildcard pattern as a SQL LIKE string (`2XX` -> `2__`)
    Wildcard(String),
    /// Malformed pattern, matches no record
    Nothing,
}

pub(crate) fn parse_status_pattern(raw: &str) -> StatusPattern {
    if raw.is_empty() {
        return StatusPattern::Any;
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return match raw.parse::<i32>() {
            Ok(code) => StatusPattern::Exact(code),
            Err(_) => StatusPattern::Nothing,
        };
    }
    if raw.chars().all(|c| c.is_ascii_digit() || c.eq_ignore_ascii_case(&'x')) {
        let like = raw
            .chars()
            .map(|c| if c.eq_ignore_ascii_case(&'x') { '_' } else { c })
            .collect();
        return StatusPattern::Wildcard(like);
    }
    StatusPattern::Nothing
}

fn wildcard_matches(status: i32, like: &str) -> bool {
    let digits = status.to_string();
    digits.len() == like.len()
        && digits
            .chars()
            .zip(like.chars())
            .all(|(d, p)| p == '_' || p == d)
}

fn constraint(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Evaluate a filter against a single record
///
/// Dimensions are AND-combined; absent fields impose no constraint.
pub fn matches(record: &LogRecord, filter: &LogFilter) -> bool {
    if let Some(start) = filter.start_date {
        if record.timestamp < start {
            return false;
        }
    }
    if let Some(end) = filter.end_date {
        if record.timestamp >= end {
            return false;
        }
    }

    if let Some(needle) = constraint(&filter.search_text) {
        if !record.content.to_lowercase().contains(&needle.to_lowercase()) {
            return false;
        }
    }

    if let Some(endpoint) = constraint(&filter.endpoint) {
        let needle = endpoint.to_lowercase();
        let in_url = record
            .url
            .as_deref()
            .is_some_and(|u| u.to_lowercase().contains(&needle));
        let in_path = record
            .path
            .as_deref()
            .is_some_and(|p| p.to_lowercase().contains(&needle));
        if !in_url && !in_path {
            return false;
        }
    }

    if let Some(raw) = constraint(&filter.status_code) {
        let matched = match (parse_status_pattern(raw), record.status_code) {
            (StatusPattern::Any, _) => true,
            (StatusPattern::Exact(code), Some(status)) => status == code,
            (StatusPattern::Wildcard(like), Some(status)) => wildcard_matches(status, &like),
            (StatusPattern::Nothing, _) | (_, None) => false,
        };
        if !matched {
            return false;
        }
    }

    if let Some(level) = constraint(&filter.log_level) {
        if level != ALL_LEVELS && record.log_level.map(|l| l.as_str()) != Some(level) {
            return false;
        }
    }

    if let Some(methods) = &filter.methods {
        if !methods.is_empty() {
            let hit = record
                .method
                .as_deref()
                .is_some_and(|m| methods.iter().any(|want| want == m));
            if !hit {
                return false;
            }
        }
    }

    let duration = record.duration_ms.unwrap_or(0);
    if filter.min_latency.is_some_and(|min| duration < min) {
        return false;
    }
    if filter.max_latency.is_some_and(|max| duration > max) {
        return false;
    }

    if filter.has_error.unwrap_or(false) && !record.is_error() {
        return false;
    }

    true
}
