//! Rolling-window metrics aggregator
//!
//! Keeps a bounded FIFO of the most recent requests for distributions and
//! time-bucketed series, a small buffer of recent errors, and lifetime
//! counters that never shrink. Per-endpoint aggregates deliberately span
//! the whole process lifetime: "top endpoints" stays meaningful long after
//! individual records have dropped out of the rolling window.

use crate::config::MetricsConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Most recent errors retained for the dashboard
const ERROR_HISTORY_LIMIT: usize = 5;

/// Latency samples kept per endpoint for average computation
const ENDPOINT_LATENCY_SAMPLES: usize = 100;

/// Derived, in-memory-only summary of a captured request
#[derive(Debug, Clone, Serialize)]
pub struct MetricSample {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub status_code: i32,
    pub duration_ms: f64,
    pub error_msg: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SummaryStats {
    pub total_requests: u64,
    pub total_errors: u64,
    pub requests_per_min: f64,
    pub uptime: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct StatusDistribution {
    #[serde(rename = "2xx")]
    pub success: u64,
    #[serde(rename = "3xx")]
    pub redirect: u64,
    #[serde(rename = "4xx")]
    pub client_error: u64,
    #[serde(rename = "5xx")]
    pub server_error: u64,
    #[serde(rename = "Other")]
    pub other: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TimelineData {
    pub times: Vec<String>,
    pub counts: Vec<u64>,
    pub error_counts: Vec<u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceData {
    pub times: Vec<String>,
    pub latencies: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EndpointCount {
    pub path: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EndpointLatency {
    pub path: String,
    pub avg_latency: f64,
}

#[derive(Default)]
struct Inner {
    history: VecDeque<MetricSample>,
    errors: VecDeque<MetricSample>,
    total_requests: u64,
    total_errors: u64,
    endpoint_counts: HashMap<String, u64>,
    endpoint_latencies: HashMap<String, VecDeque<f64>>,
}

pub struct MetricsService {
    enabled: bool,
    history_limit: usize,
    started_at: DateTime<Utc>,
    inner: Mutex<Inner>,
}

impl MetricsService {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            enabled: config.enabled,
            history_limit: config.history_limit,
            started_at: Utc::now(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one completed request
    ///
    /// No-op when metrics collection is disabled.
    pub fn record_request(
        &self,
        id: i64,
        method: &str,
        path: &str,
        status_code: i32,
        duration_ms: f64,
        error_msg: Option<String>,
    ) {
        if !self.enabled {
            return;
        }

        let sample = MetricSample {
            id,
            timestamp: Utc::now(),
            method: method.to_string(),
            path: path.to_string(),
            status_code,
            duration_ms,
            error_msg: error_msg.clone(),
        };

        let mut inner = self.lock();

        if inner.history.len() >= self.history_limit {
            inner.history.pop_front();
        }
        inner.history.push_back(sample.clone());
        inner.total_requests += 1;

        *inner.endpoint_counts.entry(path.to_string()).or_insert(0) += 1;
        let latencies = inner.endpoint_latencies.entry(path.to_string()).or_default();
        latencies.push_back(duration_ms);
        if latencies.len() > ENDPOINT_LATENCY_SAMPLES {
            latencies.pop_front();
        }

        if status_code >= 400 {
            inner.total_errors += 1;
            let has_message = error_msg.as_deref().is_some_and(|m| !m.is_empty());
            if has_message || status_code >= 500 {
                if inner.errors.len() >= ERROR_HISTORY_LIMIT {
                    inner.errors.pop_front();
                }
                inner.errors.push_back(sample);
            }
        }
    }

    /// Lifetime totals plus the request rate over the current window
    pub fn summary_stats(&self) -> SummaryStats {
        if !self.enabled {
            return SummaryStats {
                uptime: format_uptime(0),
                ..Default::default()
            };
        }

        let inner = self.lock();
        let now = Utc::now();

        let requests_per_min = if inner.history.len() > 1 {
            let oldest = inner.history.front().map(|s| s.timestamp).unwrap_or(now);
            let minutes = (now - oldest).num_milliseconds() as f64 / 60_000.0;
            if minutes > 0.0 {
                round2(inner.history.len() as f64 / minutes)
            } else {
                0.0
            }
        } else {
            0.0
        };

        SummaryStats {
            total_requests: inner.total_requests,
            total_errors: inner.total_errors,
            requests_per_min,
            uptime: format_uptime((now - self.started_at).num_seconds().max(0)),
        }
    }

    /// Per-method tallies over the rolling window only
    pub fn method_distribution(&self) -> HashMap<String, u64> {
        let inner = self.lock();
        let mut counts = HashMap::new();
        for sample in &inner.history {
            *counts.entry(sample.method.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Status-class tallies over the rolling window only
    pub fn status_distribution(&self) -> StatusDistribution {
        let inner = self.lock();
        let mut dist = StatusDistribution::default();
        for sample in &inner.history {
            match sample.status_code {
                200..=299 => dist.success += 1,
                300..=399 => dist.redirect += 1,
                400..=499 => dist.client_error += 1,
                500..=599 => dist.server_error += 1,
                _ => dist.other += 1,
            }
        }
        dist
    }

    /// Request and error counts bucketed by minute of day
    pub fn timeline_data(&self) -> TimelineData {
        let inner = self.lock();
        let mut buckets: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for sample in &inner.history {
            let key = sample.timestamp.format("%H:%M").to_string();
            let entry = buckets.entry(key).or_insert((0, 0));
            entry.0 += 1;
            if sample.status_code >= 400 {
                entry.1 += 1;
            }
        }

        let mut data = TimelineData::default();
        for (time, (count, errors)) in buckets {
            data.times.push(time);
            data.counts.push(count);
            data.error_counts.push(errors);
        }
        data
    }

    /// Average latency bucketed by minute of day
    pub fn performance_data(&self) -> PerformanceData {
        let inner = self.lock();
        let mut buckets: BTreeMap<String, (f64, u64)> = BTreeMap::new();
        for sample in &inner.history {
            let key = sample.timestamp.format("%H:%M").to_string();
            let entry = buckets.entry(key).or_insert((0.0, 0));
            entry.0 += sample.duration_ms;
            entry.1 += 1;
        }

        let mut data = PerformanceData::default();
        for (time, (sum, count)) in buckets {
            data.times.push(time);
            data.latencies.push(round2(sum / count as f64));
        }
        data
    }

    /// Busiest endpoints over the process lifetime
    pub fn top_endpoints(&self, limit: usize) -> Vec<EndpointCount> {
        let inner = self.lock();
        let mut counts: Vec<EndpointCount> = inner
            .endpoint_counts
            .iter()
            .map(|(path, count)| EndpointCount {
                path: path.clone(),
                count: *count,
            })
            .collect();
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.path.cmp(&b.path)));
        counts.truncate(limit);
        counts
    }

    /// Slowest endpoints by average latency over their recent samples
    pub fn slow_endpoints(&self, limit: usize) -> Vec<EndpointLatency> {
        let inner = self.lock();
        let mut averages: Vec<EndpointLatency> = inner
            .endpoint_latencies
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(path, samples)| EndpointLatency {
                path: path.clone(),
                avg_latency: round2(samples.iter().sum::<f64>() / samples.len() as f64),
            })
            .collect();
        averages.sort_by(|a, b| {
            b.avg_latency
                .total_cmp(&a.avg_latency)
                .then_with(|| a.path.cmp(&b.path))
        });
        averages.truncate(limit);
        averages
    }

    /// Newest-first slice of the error buffer
    pub fn recent_errors(&self, limit: usize) -> Vec<MetricSample> {
        let inner = self.lock();
        inner.errors.iter().rev().take(limit).cloned().collect()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn format_uptime(total_seconds: i64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> MetricsService {
        MetricsService::new(&MetricsConfig {
            enabled: true,
            history_limit: 1000,
        })
    }

    #[test]
    fn test_status_distribution_buckets() {
        let metrics = service();
        for (i, status) in [200, 404, 500].into_iter().enumerate() {
            metrics.record_request(i as i64, "GET", "/a", status, 10.0, None);
        }

        let dist = metrics.status_distribution();
        assert_eq!(
            dist,
            StatusDistribution {
                success: 1,
                redirect: 0,
                client_error: 1,
                server_error: 1,
                other: 0,
            }
        );
    }

    #[test]
    fn test_method_distribution_rolling_window_only() {
        let metrics = MetricsService::new(&MetricsConfig {
            enabled: true,
            history_limit: 2,
        });
        metrics.record_request(1, "DELETE", "/a", 200, 1.0, None);
        metrics.record_request(2, "GET", "/a", 200, 1.0, None);
        metrics.record_request(3, "GET", "/a", 200, 1.0, None);

        // The DELETE was evicted from the window
        let dist = metrics.method_distribution();
        assert_eq!(dist.get("GET"), Some(&2));
        assert!(!dist.contains_key("DELETE"));

        // Lifetime counters are unaffected by eviction
        assert_eq!(metrics.summary_stats().total_requests, 3);
    }

    #[test]
    fn test_error_counters_and_buffer_qualification() {
        let metrics = service();
        metrics.record_request(1, "GET", "/a", 200, 1.0, None);
        metrics.record_request(2, "GET", "/a", 404, 1.0, None);
        metrics.record_request(3, "GET", "/a", 503, 1.0, None);
        metrics.record_request(4, "GET", "/a", 400, 1.0, Some("bad payload".to_string()));

        let stats = metrics.summary_stats();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.total_errors, 3);

        // The plain 404 does not qualify for the error buffer
        let errors = metrics.recent_errors(10);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].id, 4, "newest first");
        assert_eq!(errors[1].id, 3);
    }

    #[test]
    fn test_error_buffer_is_capped() {
        let metrics = service();
        for i in 0..10 {
            metrics.record_request(i, "GET", "/a", 500, 1.0, None);
        }
        let errors = metrics.recent_errors(100);
        assert_eq!(errors.len(), ERROR_HISTORY_LIMIT);
        assert_eq!(errors[0].id, 9);
    }

    #[test]
    fn test_requests_per_min_zero_for_single_entry() {
        let metrics = service();
        assert_eq!(metrics.summary_stats().requests_per_min, 0.0);
        metrics.record_request(1, "GET", "/a", 200, 1.0, None);
        assert_eq!(metrics.summary_stats().requests_per_min, 0.0);
    }

    #[test]
    fn test_top_endpoints_persist_across_eviction() {
        let metrics = MetricsService::new(&MetricsConfig {
            enabled: true,
            history_limit: 1,
        });
        metrics.record_request(1, "GET", "/popular", 200, 5.0, None);
        metrics.record_request(2, "GET", "/popular", 200, 5.0, None);
        metrics.record_request(3, "GET", "/rare", 200, 50.0, None);

        let top = metrics.top_endpoints(5);
        assert_eq!(top[0], EndpointCount { path: "/popular".to_string(), count: 2 });
        assert_eq!(top[1], EndpointCount { path: "/rare".to_string(), count: 1 });

        let slow = metrics.slow_endpoints(5);
        assert_eq!(slow[0].path, "/rare");
        assert_eq!(slow[0].avg_latency, 50.0);
    }

    #[test]
    fn test_top_endpoints_limit() {
        let metrics = service();
        for i in 0..10 {
            metrics.record_request(i, "GET", &format!("/e{}", i), 200, 1.0, None);
        }
        assert_eq!(metrics.top_endpoints(3).len(), 3);
        assert_eq!(metrics.slow_endpoints(3).len(), 3);
    }

    #[test]
    fn test_timeline_and_performance_alignment() {
        let metrics = service();
        metrics.record_request(1, "GET", "/a", 200, 10.0, None);
        metrics.record_request(2, "GET", "/a", 500, 30.0, None);

        let timeline = metrics.timeline_data();
        assert_eq!(timeline.times.len(), timeline.counts.len());
        assert_eq!(timeline.times.len(), timeline.error_counts.len());
        assert_eq!(timeline.counts.iter().sum::<u64>(), 2);
        assert_eq!(timeline.error_counts.iter().sum::<u64>(), 1);

        let perf = metrics.performance_data();
        assert_eq!(perf.times, timeline.times);
        // Unless the clock rolled over a minute between the two samples,
        // both land in one bucket
        if perf.latencies.len() == 1 {
            assert_eq!(perf.latencies[0], 20.0);
        }
    }

    #[test]
    fn test_disabled_mode_reports_empty() {
        let metrics = MetricsService::new(&MetricsConfig {
            enabled: false,
            history_limit: 1000,
        });
        metrics.record_request(1, "GET", "/a", 500, 1.0, None);

        let stats = metrics.summary_stats();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.total_errors, 0);
        assert_eq!(stats.uptime, "0:00:00");
        assert!(metrics.method_distribution().is_empty());
        assert!(metrics.recent_errors(10).is_empty());
        assert!(metrics.top_endpoints(10).is_empty());
    }

    #[test]
    fn test_uptime_format() {
        assert_eq!(format_uptime(0), "0:00:00");
        assert_eq!(format_uptime(61), "0:01:01");
        assert_eq!(format_uptime(3_723), "1:02:03");
        assert_eq!(format_uptime(90_000), "25:00:00");
    }
}
