//! Canonical log record model
//!
//! One `LogRecord` is produced per captured request/response (or plain
//! application log line) and persisted exactly once. Records are immutable
//! values: storage assigns the id on save and returns it; callers build a
//! new record carrying the id rather than mutating in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Severity of a captured record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Http,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Http => "HTTP",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }

    /// Level derived from an HTTP response status
    pub fn from_status(status: u16) -> Self {
        if status >= 500 {
            Self::Error
        } else if status >= 400 {
            Self::Warn
        } else {
            Self::Http
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "HTTP" => Ok(Self::Http),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// One captured request/response trace
///
/// All fields except `content` and `timestamp` are optional; non-HTTP log
/// lines carry only the summary text. Structured payload fields
/// (`headers`, `request_query`, bodies) are stored as JSON text by the SQL
/// backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Assigned by storage at save time; caller-supplied values are ignored
    #[serde(default)]
    pub id: i64,
    /// Human-readable summary, e.g. "GET /api/users"
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub url: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub log_level: Option<LogLevel>,
    pub status_code: Option<i32>,
    pub duration_ms: Option<i64>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_query: Option<HashMap<String, String>>,
    pub request_body: Option<serde_json::Value>,
    pub response_headers: Option<HashMap<String, String>>,
    pub response_body: Option<serde_json::Value>,
    pub response_size_bytes: Option<i64>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
}

impl LogRecord {
    /// A record with the given summary, stamped now, everything else unset
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: 0,
            content: content.into(),
            timestamp: Utc::now(),
            method: None,
            path: None,
            url: None,
            headers: None,
            log_level: None,
            status_code: None,
            duration_ms: None,
            client_ip: None,
            user_agent: None,
            request_query: None,
            request_body: None,
            response_headers: None,
            response_body: None,
            response_size_bytes: None,
            error_message: None,
            stack_trace: None,
        }
    }

    /// Error classification used by filtering and metrics: a status of 400
    /// or above, or a non-empty error message, marks an error record.
    pub fn is_error(&self) -> bool {
        self.status_code.is_some_and(|code| code >= 400)
            || self.error_message.as_deref().is_some_and(|msg| !msg.is_empty())
    }

    /// Same record carrying its storage-assigned id
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }
}
