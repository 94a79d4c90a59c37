//! Queryable HTTP API for the captured logs
//!
//! A mountable router the host application nests under the configured
//! prefix: filtered log listing with pagination, point lookup (404 when
//! absent), aggregated dashboard stats, a live SSE feed bridged from the
//! broadcaster, a Prometheus render of the tracer's own metrics, and a
//! status probe. When an API key is configured, a bearer-token check
//! guards everything except the Prometheus endpoint.

use crate::broadcast::{LogBroadcaster, Subscription};
use crate::error::Error;
use crate::filter::{self, LogFilter};
use crate::metrics::{
    EndpointCount, EndpointLatency, MetricSample, MetricsService, PerformanceData,
    StatusDistribution, SummaryStats, TimelineData,
};
use crate::record::LogRecord;
use crate::store::LogStore;
use axum::{
    extract::{OriginalUri, Path, Query, Request, State},
    http::{header, StatusCode, Uri},
    middleware::{self, Next},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, Stream};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn LogStore>,
    pub broadcaster: Arc<LogBroadcaster>,
    pub metrics: Arc<MetricsService>,
    pub prometheus: Arc<PrometheusHandle>,
    pub api_key: Option<String>,
}

/// Build the mountable API router
pub fn router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/logs", get(query_logs))
        .route("/api/v1/logs/:id", get(get_log))
        .route("/api/v1/stats", get(get_stats))
        .route("/api/v1/stream", get(stream_logs))
        .route("/api/v1/status", get(status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/metrics", get(render_metrics))
        .merge(api_routes)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Query parameters accepted by the logs endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LogQueryParams {
    pub limit: Option<usize>,
    pub search_text: Option<String>,
    pub endpoint: Option<String>,
    pub status_code: Option<String>,
    pub log_level: Option<String>,
    /// Comma-separated method list, e.g. `GET,POST`
    pub methods: Option<String>,
    pub min_latency: Option<i64>,
    pub max_latency: Option<i64>,
    pub has_error: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl LogQueryParams {
    pub fn into_filter(self) -> LogFilter {
        let methods = self.methods.map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        });

        LogFilter {
            limit: self.limit.unwrap_or(filter::DEFAULT_LIMIT),
            search_text: self.search_text,
            endpoint: self.endpoint,
            status_code: self.status_code,
            log_level: self.log_level,
            methods,
            min_latency: self.min_latency,
            max_latency: self.max_latency,
            has_error: self.has_error,
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub data: Vec<LogRecord>,
    pub length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_url: Option<String>,
}

/// GET /api/v1/logs
async fn query_logs(
    State(state): State<ApiState>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<LogQueryParams>,
) -> Result<Json<LogsResponse>, Error> {
    let filter = params.into_filter();
    let data = state.store.fetch_logs(&filter).await?;
    let next_page_url = next_page_url(&uri, &filter, &data);

    Ok(Json(LogsResponse {
        length: data.len(),
        data,
        next_page_url,
    }))
}

/// When a full page came back, link to the next one by shifting the
/// exclusive end bound to the last returned timestamp.
fn next_page_url(uri: &Uri, filter: &LogFilter, data: &[LogRecord]) -> Option<String> {
    if filter.limit == 0 || data.len() < filter.limit {
        return None;
    }
    let last = data.last()?;

    let mut pairs: Vec<(&str, String)> = vec![("limit", filter.limit.to_string())];
    if let Some(v) = &filter.search_text {
        pairs.push(("search_text", v.clone()));
    }
    if let Some(v) = &filter.endpoint {
        pairs.push(("endpoint", v.clone()));
    }
    if let Some(v) = &filter.status_code {
        pairs.push(("status_code", v.clone()));
    }
    if let Some(v) = &filter.log_level {
        pairs.push(("log_level", v.clone()));
    }
    if let Some(v) = &filter.methods {
        if !v.is_empty() {
            pairs.push(("methods", v.join(",")));
        }
    }
    if let Some(v) = filter.min_latency {
        pairs.push(("min_latency", v.to_string()));
    }
    if let Some(v) = filter.max_latency {
        pairs.push(("max_latency", v.to_string()));
    }
    if let Some(v) = filter.has_error {
        pairs.push(("has_error", v.to_string()));
    }
    if let Some(v) = filter.start_date {
        pairs.push(("start_date", v.to_rfc3339_opts(SecondsFormat::Millis, true)));
    }
    pairs.push((
        "end_date",
        last.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
    ));

    let query = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    Some(format!("{}?{}", uri.path(), query))
}

/// GET /api/v1/logs/{id}
async fn get_log(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Response, Error> {
    match state.store.fetch_log(id).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "log not found"})),
        )
            .into_response()),
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub summary: SummaryStats,
    pub methods: HashMap<String, u64>,
    pub status: StatusDistribution,
    pub timeline: TimelineData,
    pub performance: PerformanceData,
    pub top_endpoints: Vec<EndpointCount>,
    pub slow_endpoints: Vec<EndpointLatency>,
    pub recent_errors: Vec<MetricSample>,
}

/// GET /api/v1/stats
async fn get_stats(State(state): State<ApiState>) -> Json<StatsResponse> {
    let metrics = &state.metrics;
    Json(StatsResponse {
        summary: metrics.summary_stats(),
        methods: metrics.method_distribution(),
        status: metrics.status_distribution(),
        timeline: metrics.timeline_data(),
        performance: metrics.performance_data(),
        top_endpoints: metrics.top_endpoints(5),
        slow_endpoints: metrics.slow_endpoints(5),
        recent_errors: metrics.recent_errors(10),
    })
}

/// GET /api/v1/stream - live feed of records matching the filter
async fn stream_logs(
    State(state): State<ApiState>,
    Query(params): Query<LogQueryParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let filter = params.into_filter();
    let (tx, rx) = mpsc::unbounded_channel::<LogRecord>();

    let subscription = {
        let filter = filter.clone();
        state.broadcaster.subscribe(move |record| {
            if filter::matches(record, &filter) {
                let _ = tx.send(record.clone());
            }
        })
    };
    let guard = StreamGuard {
        broadcaster: state.broadcaster.clone(),
        subscription,
    };

    let stream = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let record = rx.recv().await?;
        let event = Event::default().json_data(&record).unwrap_or_default();
        Some((Ok(event), (rx, guard)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Unsubscribes when the SSE client goes away
struct StreamGuard {
    broadcaster: Arc<LogBroadcaster>,
    subscription: Subscription,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.subscription);
    }
}

/// GET /api/v1/status
async fn status() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// GET /metrics - Prometheus render of the tracer's own metrics
async fn render_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (StatusCode::OK, state.prometheus.render())
}

/// Bearer-token check; a no-op when no API key is configured
async fn require_api_key(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.api_key else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v));

    match provided {
        Some(key) if key == expected => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Unauthorized"})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_into_filter_splits_methods() {
        let params = LogQueryParams {
            methods: Some("GET, POST ,".to_string()),
            limit: Some(50),
            ..Default::default()
        };
        let filter = params.into_filter();
        assert_eq!(
            filter.methods,
            Some(vec!["GET".to_string(), "POST".to_string()])
        );
        assert_eq!(filter.limit, 50);
    }

    #[test]
    fn test_params_default_limit() {
        let filter = LogQueryParams::default().into_filter();
        assert_eq!(filter.limit, filter::DEFAULT_LIMIT);
    }

    #[test]
    fn test_next_page_url_only_on_full_page() {
        let uri: Uri = "/api/v1/logs?limit=2".parse().unwrap();
        let filter = LogFilter {
            limit: 2,
            ..Default::default()
        };

        let partial = vec![LogRecord::new("only one")];
        assert!(next_page_url(&uri, &filter, &partial).is_none());

        let full = vec![LogRecord::new("a"), LogRecord::new("b")];
        let url = next_page_url(&uri, &filter, &full).unwrap();
        assert!(url.starts_with("/api/v1/logs?limit=2&end_date="));
    }

    #[test]
    fn test_next_page_url_carries_filter_fields() {
        let uri: Uri = "/api/v1/logs".parse().unwrap();
        let filter = LogFilter {
            limit: 1,
            status_code: Some("5XX".to_string()),
            methods: Some(vec!["GET".to_string(), "POST".to_string()]),
            ..Default::default()
        };
        let url = next_page_url(&uri, &filter, &[LogRecord::new("a")]).unwrap();
        assert!(url.contains("status_code=5XX"));
        assert!(url.contains("methods=GET,POST"));
        assert!(url.contains("end_date="));
    }
}
