//! SQL shared between the SQLite and PostgreSQL backends
//!
//! The filter dimensions are backend-independent, so both backends build
//! their WHERE clauses here; they differ only in placeholder syntax and
//! pattern operator (`LIKE` vs `ILIKE`). The generated predicates are kept
//! behaviourally identical to `filter::matches`: NULL latency is coalesced
//! to 0, LIKE metacharacters in user text are escaped, and the error
//! classification includes the error-message clause.

use crate::filter::{parse_status_pattern, LogFilter, StatusPattern, ALL_LEVELS};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SqlDialect {
    Sqlite,
    Postgres,
}

impl SqlDialect {
    fn placeholder(&self, n: usize) -> String {
        match self {
            Self::Sqlite => "?".to_string(),
            Self::Postgres => format!("${}", n),
        }
    }

    /// Case-insensitive substring operator. SQLite LIKE is already
    /// case-insensitive for ASCII; PostgreSQL needs ILIKE.
    fn like_operator(&self) -> &'static str {
        match self {
            Self::Sqlite => "LIKE",
            Self::Postgres => "ILIKE",
        }
    }
}

/// Positional parameter produced by the filter translation
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlParam {
    Int(i64),
    Float(f64),
    Text(String),
}

const COLUMNS: &str = "id, content, timestamp, method, path, url, headers, log_level, \
     status_code, duration_ms, client_ip, user_agent, request_query, request_body, \
     response_headers, response_body, response_size_bytes, error_message, stack_trace";

const INSERT_COLUMNS: &str = "content, timestamp, method, path, url, headers, log_level, \
     status_code, duration_ms, client_ip, user_agent, request_query, request_body, \
     response_headers, response_body, response_size_bytes, error_message, stack_trace";

pub(crate) const CREATE_TABLE_SQLITE: &str = "\
    CREATE TABLE IF NOT EXISTS requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content TEXT NOT NULL,
        timestamp REAL NOT NULL,
        method TEXT,
        path TEXT,
        url TEXT,
        headers TEXT,
        log_level TEXT,
        status_code INTEGER,
        duration_ms BIGINT,
        client_ip TEXT,
        user_agent TEXT,
        request_query TEXT,
        request_body TEXT,
        response_headers TEXT,
        response_body TEXT,
        response_size_bytes BIGINT,
        error_message TEXT,
        stack_trace TEXT
    )";

pub(crate) const CREATE_TABLE_POSTGRES: &str = "\
    CREATE TABLE IF NOT EXISTS requests (
        id BIGSERIAL PRIMARY KEY,
        content TEXT NOT NULL,
        timestamp DOUBLE PRECISION NOT NULL,
        method TEXT,
        path TEXT,
        url TEXT,
        headers TEXT,
        log_level TEXT,
        status_code INTEGER,
        duration_ms BIGINT,
        client_ip TEXT,
        user_agent TEXT,
        request_query TEXT,
        request_body TEXT,
        response_headers TEXT,
        response_body TEXT,
        response_size_bytes BIGINT,
        error_message TEXT,
        stack_trace TEXT
    )";

pub(crate) fn insert_sql(dialect: SqlDialect) -> String {
    let placeholders: Vec<String> = (1..=18).map(|n| dialect.placeholder(n)).collect();
    let mut sql = format!(
        "INSERT INTO requests ({}) VALUES ({})",
        INSERT_COLUMNS,
        placeholders.join(", ")
    );
    if dialect == SqlDialect::Postgres {
        sql.push_str(" RETURNING id");
    }
    sql
}

pub(crate) fn select_by_id_sql(dialect: SqlDialect) -> String {
    format!(
        "SELECT {} FROM requests WHERE id = {}",
        COLUMNS,
        dialect.placeholder(1)
    )
}

pub(crate) fn delete_older_than_sql(dialect: SqlDialect) -> String {
    format!(
        "DELETE FROM requests WHERE timestamp < {}",
        dialect.placeholder(1)
    )
}

/// Keep the newest N records by (timestamp, id), delete the rest
pub(crate) fn delete_excess_sql(dialect: SqlDialect) -> String {
    format!(
        "DELETE FROM requests WHERE id NOT IN \
         (SELECT id FROM requests ORDER BY timestamp DESC, id DESC LIMIT {})",
        dialect.placeholder(1)
    )
}

/// Build the filtered fetch query and its positional parameters
pub(crate) fn select_sql(filter: &LogFilter, dialect: SqlDialect) -> (String, Vec<SqlParam>) {
    let mut builder = QueryBuilder::new(dialect);
    builder.sql = format!("SELECT {} FROM requests WHERE 1=1", COLUMNS);
    push_filter_clauses(&mut builder, filter);

    let limit = builder.bind(SqlParam::Int(filter.limit as i64));
    builder
        .sql
        .push_str(&format!(" ORDER BY timestamp DESC, id DESC LIMIT {}", limit));

    (builder.sql, builder.params)
}

struct QueryBuilder {
    dialect: SqlDialect,
    sql: String,
    params: Vec<SqlParam>,
}

impl QueryBuilder {
    fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        self.dialect.placeholder(self.params.len())
    }
}

fn push_filter_clauses(builder: &mut QueryBuilder, filter: &LogFilter) {
    let like = builder.dialect.like_operator();

    if let Some(start) = filter.start_date {
        let p = builder.bind(SqlParam::Float(datetime_to_epoch(start)));
        builder.sql.push_str(&format!(" AND timestamp >= {}", p));
    }
    if let Some(end) = filter.end_date {
        let p = builder.bind(SqlParam::Float(datetime_to_epoch(end)));
        builder.sql.push_str(&format!(" AND timestamp < {}", p));
    }

    if let Some(needle) = nonempty(&filter.search_text) {
        let p = builder.bind(SqlParam::Text(format!("%{}%", escape_like(needle))));
        builder
            .sql
            .push_str(&format!(" AND content {} {} ESCAPE '\\'", like, p));
    }

    if let Some(endpoint) = nonempty(&filter.endpoint) {
        let pattern = format!("%{}%", escape_like(endpoint));
        let p_url = builder.bind(SqlParam::Text(pattern.clone()));
        let p_path = builder.bind(SqlParam::Text(pattern));
        builder.sql.push_str(&format!(
            " AND (url {like} {p_url} ESCAPE '\\' OR path {like} {p_path} ESCAPE '\\')"
        ));
    }

    if let Some(raw) = nonempty(&filter.status_code) {
        match parse_status_pattern(raw) {
            StatusPattern::Any => {}
            StatusPattern::Exact(code) => {
                let p = builder.bind(SqlParam::Int(code as i64));
                builder.sql.push_str(&format!(" AND status_code = {}", p));
            }
            StatusPattern::Wildcard(pattern) => {
                // Pattern is digits and `_` only, no escaping needed
                let p = builder.bind(SqlParam::Text(pattern));
                builder
                    .sql
                    .push_str(&format!(" AND CAST(status_code AS TEXT) LIKE {}", p));
            }
            StatusPattern::Nothing => {
                builder.sql.push_str(" AND 1 = 0");
            }
        }
    }

    if let Some(level) = nonempty(&filter.log_level) {
        if level != ALL_LEVELS {
            let p = builder.bind(SqlParam::Text(level.to_string()));
            builder.sql.push_str(&format!(" AND log_level = {}", p));
        }
    }

    if let Some(methods) = &filter.methods {
        if !methods.is_empty() {
            let placeholders: Vec<String> = methods
                .iter()
                .map(|m| builder.bind(SqlParam::Text(m.clone())))
                .collect();
            builder
                .sql
                .push_str(&format!(" AND method IN ({})", placeholders.join(", ")));
        }
    }

    if let Some(min) = filter.min_latency {
        let p = builder.bind(SqlParam::Int(min));
        builder
            .sql
            .push_str(&format!(" AND COALESCE(duration_ms, 0) >= {}", p));
    }
    if let Some(max) = filter.max_latency {
        let p = builder.bind(SqlParam::Int(max));
        builder
            .sql
            .push_str(&format!(" AND COALESCE(duration_ms, 0) <= {}", p));
    }

    if filter.has_error.unwrap_or(false) {
        builder.sql.push_str(
            " AND (COALESCE(status_code, 0) >= 400 OR COALESCE(error_message, '') <> '')",
        );
    }
}

fn nonempty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Escape LIKE metacharacters so user text is matched as a literal
/// substring, the same way the in-memory predicate does.
fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Timestamps are persisted as epoch seconds (REAL / DOUBLE PRECISION)
/// for portable comparison and sorting.
pub(crate) fn datetime_to_epoch(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_millis() as f64 / 1000.0
}

pub(crate) fn epoch_to_datetime(epoch: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis((epoch * 1000.0).round() as i64)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_styles() {
        assert_eq!(SqlDialect::Sqlite.placeholder(3), "?");
        assert_eq!(SqlDialect::Postgres.placeholder(3), "$3");
    }

    #[test]
    fn test_insert_sql_returning_only_on_postgres() {
        assert!(!insert_sql(SqlDialect::Sqlite).contains("RETURNING"));
        assert!(insert_sql(SqlDialect::Postgres).ends_with("RETURNING id"));
    }

    #[test]
    fn test_select_sql_empty_filter() {
        let (sql, params) = select_sql(&LogFilter::default(), SqlDialect::Sqlite);
        assert!(sql.contains("WHERE 1=1 ORDER BY timestamp DESC, id DESC LIMIT ?"));
        assert_eq!(params, vec![SqlParam::Int(20)]);
    }

    #[test]
    fn test_select_sql_binds_in_order() {
        let filter = LogFilter {
            search_text: Some("checkout".to_string()),
            status_code: Some("5XX".to_string()),
            methods: Some(vec!["GET".to_string(), "POST".to_string()]),
            min_latency: Some(10),
            limit: 5,
            ..Default::default()
        };
        let (sql, params) = select_sql(&filter, SqlDialect::Postgres);

        assert!(sql.contains("content ILIKE $1"));
        assert!(sql.contains("CAST(status_code AS TEXT) LIKE $2"));
        assert!(sql.contains("method IN ($3, $4)"));
        assert!(sql.contains("COALESCE(duration_ms, 0) >= $5"));
        assert!(sql.ends_with("LIMIT $6"));
        assert_eq!(params.len(), 6);
        assert_eq!(params[1], SqlParam::Text("5__".to_string()));
        assert_eq!(params[5], SqlParam::Int(5));
    }

    #[test]
    fn test_malformed_status_pattern_is_false_predicate() {
        let filter = LogFilter {
            status_code: Some("abc".to_string()),
            ..Default::default()
        };
        let (sql, params) = select_sql(&filter, SqlDialect::Sqlite);
        assert!(sql.contains(" AND 1 = 0"));
        assert_eq!(params.len(), 1); // just the limit
    }

    #[test]
    fn test_sentinel_level_not_translated() {
        let filter = LogFilter {
            log_level: Some(ALL_LEVELS.to_string()),
            ..Default::default()
        };
        let (sql, _) = select_sql(&filter, SqlDialect::Sqlite);
        assert!(!sql.contains("log_level"));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50% off_deal"), "50\\% off\\_deal");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_epoch_round_trip() {
        let now = Utc::now();
        let back = epoch_to_datetime(datetime_to_epoch(now));
        let delta = (now - back).num_milliseconds().abs();
        assert!(delta < 1000, "round trip drifted by {}ms", delta);
    }
}
