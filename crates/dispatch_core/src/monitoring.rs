//! Error monitoring sink.
//!
//! Every failure in the core is reported here. Each report is classified
//! into a category and severity by pattern match over its code, service,
//! message, and HTTP status, kept in a bounded rolling ring, and rolled up
//! into windowed metrics. Threshold crossings publish an `Alert` event
//! exactly once per crossing (edge detection, no further de-duplication).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::MonitoringConfig;
use crate::error::DispatchError;
use crate::events::{EventBus, FleetEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Database,
    Agent,
    Api,
    Validation,
    Authentication,
    Authorization,
    ExternalService,
    System,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    HighErrorRate,
    CriticalErrorThreshold,
    ConsecutiveErrors,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::HighErrorRate => "HIGH_ERROR_RATE",
            AlertKind::CriticalErrorThreshold => "CRITICAL_ERROR_THRESHOLD",
            AlertKind::ConsecutiveErrors => "CONSECUTIVE_ERRORS",
        }
    }
}

/// Raw error report from an engine or adapter.
#[derive(Debug, Clone, Default)]
pub struct ErrorReport {
    pub code: Option<String>,
    pub service: Option<String>,
    pub message: String,
    pub http_status: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct TrackedError {
    pub at: DateTime<Utc>,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub code: Option<String>,
    pub service: Option<String>,
    pub message: String,
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|needle| lower.contains(needle))
}

/// Classify a report into a category.
pub fn classify_category(report: &ErrorReport) -> ErrorCategory {
    let code = report.code.as_deref().unwrap_or("");
    let service = report.service.as_deref().unwrap_or("");
    let message = report.message.as_str();

    if contains_any(code, &["database", "sql", "db"])
        || contains_any(service, &["postgres", "database"])
        || contains_any(message, &["sql", "database", "connection pool", "deadlock"])
    {
        return ErrorCategory::Database;
    }
    match report.http_status {
        Some(401) => return ErrorCategory::Authentication,
        Some(403) => return ErrorCategory::Authorization,
        Some(400) | Some(422) => return ErrorCategory::Validation,
        _ => {}
    }
    if contains_any(code, &["validation"]) || contains_any(message, &["validation", "invalid"]) {
        return ErrorCategory::Validation;
    }
    if contains_any(code, &["cooldown", "trigger"]) || contains_any(service, &["agent"]) {
        return ErrorCategory::Agent;
    }
    if contains_any(service, &["router", "cvrp", "routing", "matrix"])
        || contains_any(code, &["external_router", "cvrp"])
        || contains_any(message, &["unreachable", "upstream"])
    {
        return ErrorCategory::ExternalService;
    }
    if contains_any(message, &["panic", "out of memory", "task aborted"]) {
        return ErrorCategory::System;
    }
    if report.http_status.is_some_and(|status| status >= 500) || contains_any(code, &["api"]) {
        return ErrorCategory::Api;
    }
    ErrorCategory::Unknown
}

/// Derive a severity from the category and status.
pub fn classify_severity(report: &ErrorReport, category: ErrorCategory) -> ErrorSeverity {
    match category {
        ErrorCategory::System => ErrorSeverity::Critical,
        ErrorCategory::Database => {
            if contains_any(&report.message, &["connection", "pool"]) {
                ErrorSeverity::Critical
            } else {
                ErrorSeverity::High
            }
        }
        ErrorCategory::Authentication | ErrorCategory::Authorization => ErrorSeverity::High,
        ErrorCategory::ExternalService => ErrorSeverity::Medium,
        ErrorCategory::Api => {
            if report.http_status.is_some_and(|status| status >= 500) {
                ErrorSeverity::High
            } else {
                ErrorSeverity::Medium
            }
        }
        ErrorCategory::Agent => ErrorSeverity::Medium,
        ErrorCategory::Validation => ErrorSeverity::Low,
        ErrorCategory::Unknown => ErrorSeverity::Medium,
    }
}

/// Counts over one trailing window.
#[derive(Debug, Clone, Default)]
pub struct WindowStats {
    pub total: usize,
    pub errors_per_minute: f64,
    pub by_category: HashMap<ErrorCategory, usize>,
    pub by_severity: HashMap<ErrorSeverity, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ErrorMetrics {
    pub last_5m: WindowStats,
    pub last_1h: WindowStats,
    pub last_24h: WindowStats,
}

#[derive(Default)]
struct MonitorState {
    ring: VecDeque<TrackedError>,
    high_rate_active: bool,
    critical_active: bool,
    consecutive_active: bool,
}

pub struct ErrorMonitor {
    config: MonitoringConfig,
    bus: EventBus,
    inner: Mutex<MonitorState>,
}

impl ErrorMonitor {
    pub fn new(config: MonitoringConfig, bus: EventBus) -> Self {
        Self {
            config,
            bus,
            inner: Mutex::new(MonitorState::default()),
        }
    }

    /// Record an error report.
    pub fn track(&self, report: ErrorReport) {
        self.track_at(Utc::now(), report);
    }

    /// Convenience wrapper for engine failures.
    pub fn track_dispatch(&self, service: &str, err: &DispatchError) {
        self.track(ErrorReport {
            code: Some(err.code().to_string()),
            service: Some(service.to_string()),
            message: err.to_string(),
            http_status: None,
        });
    }

    pub(crate) fn track_at(&self, now: DateTime<Utc>, report: ErrorReport) {
        let category = classify_category(&report);
        let severity = classify_severity(&report, category);
        let tracked = TrackedError {
            at: now,
            category,
            severity,
            code: report.code.clone(),
            service: report.service.clone(),
            message: report.message.clone(),
        };

        let alerts = {
            let mut state = self.inner.lock().unwrap();
            state.ring.push_back(tracked);
            while state.ring.len() > self.config.ring_capacity {
                state.ring.pop_front();
            }
            let retention = Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| Duration::hours(24));
            while state
                .ring
                .front()
                .is_some_and(|e| now - e.at > retention)
            {
                state.ring.pop_front();
            }
            self.evaluate_alerts(&mut state, now)
        };

        self.bus.publish(FleetEvent::ErrorTracked {
            category,
            severity,
            code: report.code,
            at: now,
        });

        for (kind, observed, threshold, message) in alerts {
            warn!(alert = kind.as_str(), observed, threshold, "{message}");
            self.bus.publish(FleetEvent::Alert {
                kind,
                message,
                observed,
                threshold,
                at: now,
            });
        }
    }

    /// Alert conditions with edge detection: each fires once per crossing
    /// and re-arms when the condition clears.
    fn evaluate_alerts(
        &self,
        state: &mut MonitorState,
        now: DateTime<Utc>,
    ) -> Vec<(AlertKind, f64, f64, String)> {
        let mut fired = Vec::new();

        let five_min_count = state
            .ring
            .iter()
            .filter(|e| now - e.at <= Duration::minutes(5))
            .count();
        let rate = five_min_count as f64 / 5.0;
        if rate > self.config.error_rate_threshold {
            if !state.high_rate_active {
                state.high_rate_active = true;
                fired.push((
                    AlertKind::HighErrorRate,
                    rate,
                    self.config.error_rate_threshold,
                    format!("error rate {rate:.1}/min over the last 5 minutes"),
                ));
            }
        } else {
            state.high_rate_active = false;
        }

        let critical_count = state
            .ring
            .iter()
            .filter(|e| {
                e.severity == ErrorSeverity::Critical && now - e.at <= Duration::hours(1)
            })
            .count();
        if critical_count >= self.config.critical_error_threshold {
            if !state.critical_active {
                state.critical_active = true;
                fired.push((
                    AlertKind::CriticalErrorThreshold,
                    critical_count as f64,
                    self.config.critical_error_threshold as f64,
                    format!("{critical_count} critical errors in the last hour"),
                ));
            }
        } else {
            state.critical_active = false;
        }

        let n = self.config.consecutive_error_threshold;
        let consecutive = state.ring.len() >= n
            && state
                .ring
                .iter()
                .rev()
                .take(n)
                .all(|e| now - e.at <= Duration::seconds(60));
        if consecutive {
            if !state.consecutive_active {
                state.consecutive_active = true;
                fired.push((
                    AlertKind::ConsecutiveErrors,
                    n as f64,
                    n as f64,
                    format!("last {n} errors all within 60 seconds"),
                ));
            }
        } else {
            state.consecutive_active = false;
        }

        fired
    }

    pub fn metrics(&self) -> ErrorMetrics {
        self.metrics_at(Utc::now())
    }

    pub(crate) fn metrics_at(&self, now: DateTime<Utc>) -> ErrorMetrics {
        let state = self.inner.lock().unwrap();
        let window = |minutes: i64| {
            let mut stats = WindowStats::default();
            for error in state
                .ring
                .iter()
                .filter(|e| now - e.at <= Duration::minutes(minutes))
            {
                stats.total += 1;
                *stats.by_category.entry(error.category).or_insert(0) += 1;
                *stats.by_severity.entry(error.severity).or_insert(0) += 1;
            }
            stats.errors_per_minute = stats.total as f64 / minutes as f64;
            stats
        };
        ErrorMetrics {
            last_5m: window(5),
            last_1h: window(60),
            last_24h: window(24 * 60),
        }
    }

    /// Number of errors currently retained.
    pub fn ring_len(&self) -> usize {
        self.inner.lock().unwrap().ring.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> (ErrorMonitor, tokio::sync::broadcast::Receiver<FleetEvent>) {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        (ErrorMonitor::new(MonitoringConfig::default(), bus), rx)
    }

    fn db_report() -> ErrorReport {
        ErrorReport {
            code: Some("DATABASE_ERROR".to_string()),
            service: Some("postgres".to_string()),
            message: "connection pool exhausted".to_string(),
            http_status: None,
        }
    }

    #[test]
    fn classifies_database_errors_as_critical_on_connection_loss() {
        let report = db_report();
        let category = classify_category(&report);
        assert_eq!(category, ErrorCategory::Database);
        assert_eq!(
            classify_severity(&report, category),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn classifies_http_statuses() {
        for (status, expected) in [
            (401, ErrorCategory::Authentication),
            (403, ErrorCategory::Authorization),
            (422, ErrorCategory::Validation),
            (503, ErrorCategory::Api),
        ] {
            let report = ErrorReport {
                http_status: Some(status),
                message: "call failed".to_string(),
                ..Default::default()
            };
            assert_eq!(classify_category(&report), expected, "status {status}");
        }
    }

    #[test]
    fn unknown_reports_stay_unknown() {
        let report = ErrorReport {
            message: "something odd".to_string(),
            ..Default::default()
        };
        assert_eq!(classify_category(&report), ErrorCategory::Unknown);
    }

    #[test]
    fn ring_is_bounded() {
        let (monitor, _rx) = monitor();
        for i in 0..1100 {
            monitor.track(ErrorReport {
                message: format!("error {i}"),
                ..Default::default()
            });
        }
        assert_eq!(monitor.ring_len(), 1000);
    }

    #[test]
    fn metrics_count_by_window() {
        let (monitor, _rx) = monitor();
        let now = Utc::now();
        monitor.track_at(now - Duration::minutes(2), db_report());
        monitor.track_at(
            now - Duration::minutes(30),
            ErrorReport {
                message: "validation failed: invalid weight".to_string(),
                ..Default::default()
            },
        );
        let metrics = monitor.metrics_at(now);
        assert_eq!(metrics.last_5m.total, 1);
        assert_eq!(metrics.last_1h.total, 2);
        assert_eq!(
            metrics.last_1h.by_category.get(&ErrorCategory::Validation),
            Some(&1)
        );
    }

    #[test]
    fn critical_threshold_alert_fires_once_per_crossing() {
        let (monitor, mut rx) = monitor();
        let now = Utc::now();
        for i in 0..6 {
            monitor.track_at(now + Duration::seconds(i * 120), db_report());
        }
        let mut alerts = 0;
        while let Ok(event) = rx.try_recv() {
            if let FleetEvent::Alert { kind, .. } = event {
                if kind == AlertKind::CriticalErrorThreshold {
                    alerts += 1;
                }
            }
        }
        assert_eq!(alerts, 1, "alert must fire exactly once per crossing");
    }

    #[test]
    fn consecutive_errors_alert_needs_a_fast_burst() {
        let (monitor, mut rx) = monitor();
        let now = Utc::now();
        // 20 errors inside one minute.
        for i in 0..20 {
            monitor.track_at(
                now + Duration::seconds(i),
                ErrorReport {
                    message: format!("burst {i}"),
                    ..Default::default()
                },
            );
        }
        let fired = std::iter::from_fn(|| rx.try_recv().ok()).any(|event| {
            matches!(
                event,
                FleetEvent::Alert {
                    kind: AlertKind::ConsecutiveErrors,
                    ..
                }
            )
        });
        assert!(fired);
    }
}
