//! Request capture middleware
//!
//! Wraps the host application's routes and produces one log record per
//! completed request (including failed ones), driving the store, the
//! broadcaster, and the metrics aggregator in that order. Capture is
//! best-effort: any failure on this path is logged and contained, and the
//! traced response is always returned to its caller.

use crate::broadcast::LogBroadcaster;
use crate::config::CaptureConfig;
use crate::metrics::MetricsService;
use crate::record::{LogLevel, LogRecord};
use crate::store::LogStore;
use crate::telemetry;
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Shared handles the middleware needs; obtained from
/// [`Tracer::capture_state`](crate::Tracer::capture_state)
#[derive(Clone)]
pub struct CaptureState {
    pub store: Arc<dyn LogStore>,
    pub broadcaster: Arc<LogBroadcaster>,
    pub metrics: Arc<MetricsService>,
    pub config: CaptureConfig,
    pub mount_path: String,
}

/// Middleware entry point, for `axum::middleware::from_fn_with_state`
pub async fn trace_requests(
    State(state): State<CaptureState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !state.config.save_own_traces && path.starts_with(&state.mount_path) {
        return next.run(request).await;
    }

    let method = request.method().to_string();
    let url = request.uri().to_string();
    let headers = header_map(request.headers());
    let request_query = parse_query(request.uri().query());
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let client_ip = client_ip(&request);

    let (request, request_body) = if state.config.capture_request_body {
        capture_request_body(request, state.config.max_request_body_size).await
    } else {
        (request, None)
    };

    let started = Instant::now();
    let timestamp = Utc::now();
    let response = next.run(request).await;
    let duration = started.elapsed();
    let duration_ms = duration.as_millis() as i64;

    let status = response.status().as_u16();
    let response_headers = header_map(response.headers());
    let response_size_bytes = content_length(response.headers()).map(|len| len as i64);

    let (response, response_body) = if state.config.capture_response_body {
        capture_response_body(response, state.config.max_response_body_size).await
    } else {
        (response, None)
    };

    let error_message = (status >= 400).then(|| format!("HTTP {} Error", status));

    let record = LogRecord {
        id: 0,
        content: format!("{} {}", method, url),
        timestamp,
        method: Some(method.clone()),
        path: Some(path.clone()),
        url: Some(url),
        headers,
        log_level: Some(LogLevel::from_status(status)),
        status_code: Some(status as i32),
        duration_ms: Some(duration_ms),
        client_ip,
        user_agent,
        request_query,
        request_body,
        response_headers,
        response_body,
        response_size_bytes,
        error_message: error_message.clone(),
        stack_trace: None,
    };

    telemetry::record_request(&method, telemetry::status_class(status));
    telemetry::record_duration(&method, duration);
    if status >= 400 {
        telemetry::record_error(&method);
    }

    match state.store.save_log(&record).await {
        Ok(id) => {
            let stored = record.with_id(id);
            state.broadcaster.broadcast(&stored);
            state.metrics.record_request(
                id,
                &method,
                &path,
                status as i32,
                duration_ms as f64,
                error_message,
            );
        }
        Err(e) => {
            tracing::error!(error = %e, %method, %path, "failed to persist trace record");
            telemetry::record_capture_failure("save");
        }
    }

    response
}

/// Buffer the request body when its declared size is within the cap
///
/// Bodies without a content-length (streaming uploads) or above the cap
/// pass through untouched rather than being consumed.
async fn capture_request_body(request: Request, cap: usize) -> (Request, Option<Value>) {
    let within_cap = content_length(request.headers()).is_some_and(|len| len <= cap as u64);
    if !within_cap {
        return (request, None);
    }

    let (parts, body) = request.into_parts();
    let (body, decoded) = buffer_body(body, cap).await;
    (Request::from_parts(parts, body), decoded)
}

async fn capture_response_body(response: Response, cap: usize) -> (Response, Option<Value>) {
    let within_cap = content_length(response.headers()).is_some_and(|len| len <= cap as u64);
    if !within_cap {
        return (response, None);
    }

    let (parts, body) = response.into_parts();
    let (body, decoded) = buffer_body(body, cap).await;
    (Response::from_parts(parts, body), decoded)
}

async fn buffer_body(body: Body, cap: usize) -> (Body, Option<Value>) {
    match axum::body::to_bytes(body, cap).await {
        Ok(bytes) => {
            let decoded = decode_body(&bytes);
            (Body::from(bytes), decoded)
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to buffer body for capture");
            (Body::empty(), None)
        }
    }
}

/// JSON payloads are kept structured; anything else is captured as text
fn decode_body(bytes: &Bytes) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(String::from_utf8_lossy(bytes).into_owned())),
    }
}

fn header_map(headers: &HeaderMap) -> Option<HashMap<String, String>> {
    if headers.is_empty() {
        return None;
    }
    Some(
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
    )
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn parse_query(query: Option<&str>) -> Option<HashMap<String, String>> {
    let query = query.filter(|q| !q.is_empty())?;
    Some(
        query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect(),
    )
}

fn client_ip(request: &Request) -> Option<String> {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip().to_string());
    }
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}
