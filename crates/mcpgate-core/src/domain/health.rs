//! Health probe history and derived metrics.
//!
//! Each server keeps a bounded ring buffer of probe results. Metrics and
//! alert thresholds are derived from the buffer on demand; nothing here
//! performs probes or mutates supervisor state.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of probe results retained per server.
pub const HISTORY_CAPACITY: usize = 100;

/// Window used for the recent-failure-rate metric.
const RECENT_WINDOW: usize = 10;

/// Response time above which a healthy probe raises a slow-response alert.
const SLOW_RESPONSE_MS: u64 = 10_000;

/// Result of a single health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    /// When the probe completed.
    pub at: DateTime<Utc>,
    /// Whether any endpoint returned 200.
    pub healthy: bool,
    /// Round-trip time of the winning (or last attempted) request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// Last observed HTTP status, if any request completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// The endpoint that answered (e.g. "/openapi.json").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Whether a 401 was observed on any endpoint.
    pub auth_error: bool,
    /// Transport-level error, when no endpoint answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Metrics derived from a server's probe history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    /// Fraction of healthy probes across the whole buffer, 0.0..=1.0.
    pub uptime: f64,
    /// Fraction of failed probes in the last ten, 0.0..=1.0.
    pub recent_failure_rate: f64,
    /// Failed probes counted back from the tail.
    pub consecutive_failures: usize,
    /// Mean response time over healthy probes, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_response_time_ms: Option<u64>,
    /// Total probes in the buffer.
    pub samples: usize,
}

/// Alert severity, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    High,
    Medium,
    Low,
}

/// What tripped an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ConsecutiveFailures,
    HighFailureRate,
    SlowResponse,
}

/// An alert derived from probe history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthAlert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
}

/// Bounded ring buffer of probe results for one server.
#[derive(Debug, Clone, Default)]
pub struct HealthHistory {
    records: VecDeque<HealthRecord>,
}

impl HealthHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Append a record, evicting the oldest at capacity.
    pub fn push(&mut self, record: HealthRecord) {
        if self.records.len() == HISTORY_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Most recent record, if any probe has run.
    #[must_use]
    pub fn latest(&self) -> Option<&HealthRecord> {
        self.records.back()
    }

    /// All records, oldest first.
    #[must_use]
    pub fn records(&self) -> impl Iterator<Item = &HealthRecord> {
        self.records.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Derive metrics from the buffer.
    #[must_use]
    pub fn metrics(&self) -> HealthMetrics {
        let samples = self.records.len();
        let healthy = self.records.iter().filter(|r| r.healthy).count();

        let recent: Vec<&HealthRecord> = self.records.iter().rev().take(RECENT_WINDOW).collect();
        let recent_failures = recent.iter().filter(|r| !r.healthy).count();

        let consecutive_failures = self
            .records
            .iter()
            .rev()
            .take_while(|r| !r.healthy)
            .count();

        let response_times: Vec<u64> = self
            .records
            .iter()
            .filter(|r| r.healthy)
            .filter_map(|r| r.response_time_ms)
            .collect();
        let avg_response_time_ms = if response_times.is_empty() {
            None
        } else {
            Some(response_times.iter().sum::<u64>() / response_times.len() as u64)
        };

        HealthMetrics {
            uptime: if samples == 0 {
                0.0
            } else {
                healthy as f64 / samples as f64
            },
            recent_failure_rate: if recent.is_empty() {
                0.0
            } else {
                recent_failures as f64 / recent.len() as f64
            },
            consecutive_failures,
            avg_response_time_ms,
            samples,
        }
    }

    /// Evaluate alert thresholds against the current buffer.
    #[must_use]
    pub fn alerts(&self) -> Vec<HealthAlert> {
        let metrics = self.metrics();
        let mut alerts = Vec::new();

        if metrics.consecutive_failures >= 3 {
            alerts.push(HealthAlert {
                kind: AlertKind::ConsecutiveFailures,
                severity: AlertSeverity::High,
                message: format!("{} consecutive failed probes", metrics.consecutive_failures),
            });
        }
        if metrics.samples >= RECENT_WINDOW && metrics.recent_failure_rate >= 0.8 {
            alerts.push(HealthAlert {
                kind: AlertKind::HighFailureRate,
                severity: AlertSeverity::Medium,
                message: format!(
                    "{:.0}% of recent probes failed",
                    metrics.recent_failure_rate * 100.0
                ),
            });
        }
        if let Some(latest) = self.latest() {
            if latest.healthy {
                if let Some(ms) = latest.response_time_ms {
                    if ms > SLOW_RESPONSE_MS {
                        alerts.push(HealthAlert {
                            kind: AlertKind::SlowResponse,
                            severity: AlertSeverity::Low,
                            message: format!("latest probe took {ms}ms"),
                        });
                    }
                }
            }
        }

        alerts
    }
}

impl HealthRecord {
    /// A successful probe result.
    #[must_use]
    pub fn healthy(endpoint: &str, response_time_ms: u64) -> Self {
        Self {
            at: Utc::now(),
            healthy: true,
            response_time_ms: Some(response_time_ms),
            status_code: Some(200),
            endpoint: Some(endpoint.to_string()),
            auth_error: false,
            error: None,
        }
    }

    /// A failed probe result.
    #[must_use]
    pub fn unhealthy(status_code: Option<u16>, auth_error: bool, error: Option<String>) -> Self {
        Self {
            at: Utc::now(),
            healthy: false,
            response_time_ms: None,
            status_code,
            endpoint: None,
            auth_error,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> HealthRecord {
        HealthRecord::healthy("/openapi.json", 20)
    }

    fn fail() -> HealthRecord {
        HealthRecord::unhealthy(Some(500), false, None)
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let mut history = HealthHistory::new();
        for _ in 0..HISTORY_CAPACITY {
            history.push(ok());
        }
        history.push(fail());
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert!(!history.latest().unwrap().healthy);
    }

    #[test]
    fn consecutive_failures_counts_from_tail() {
        let mut history = HealthHistory::new();
        history.push(ok());
        history.push(fail());
        history.push(fail());
        assert_eq!(history.metrics().consecutive_failures, 2);

        history.push(ok());
        assert_eq!(history.metrics().consecutive_failures, 0);
    }

    #[test]
    fn recent_failure_rate_uses_last_ten() {
        let mut history = HealthHistory::new();
        for _ in 0..20 {
            history.push(ok());
        }
        for _ in 0..9 {
            history.push(fail());
        }
        let metrics = history.metrics();
        assert!((metrics.recent_failure_rate - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn uptime_is_fraction_of_buffer() {
        let mut history = HealthHistory::new();
        history.push(ok());
        history.push(fail());
        assert!((history.metrics().uptime - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn avg_response_time_ignores_failures() {
        let mut history = HealthHistory::new();
        history.push(HealthRecord::healthy("/", 10));
        history.push(HealthRecord::healthy("/", 30));
        history.push(fail());
        assert_eq!(history.metrics().avg_response_time_ms, Some(20));
    }

    #[test]
    fn alert_on_three_consecutive_failures() {
        let mut history = HealthHistory::new();
        for _ in 0..3 {
            history.push(fail());
        }
        let alerts = history.alerts();
        assert!(
            alerts
                .iter()
                .any(|a| a.kind == AlertKind::ConsecutiveFailures
                    && a.severity == AlertSeverity::High)
        );
    }

    #[test]
    fn alert_on_slow_response() {
        let mut history = HealthHistory::new();
        history.push(HealthRecord::healthy("/docs", 12_000));
        let alerts = history.alerts();
        assert!(
            alerts
                .iter()
                .any(|a| a.kind == AlertKind::SlowResponse && a.severity == AlertSeverity::Low)
        );
    }

    #[test]
    fn no_alerts_on_empty_history() {
        assert!(HealthHistory::new().alerts().is_empty());
    }
}
