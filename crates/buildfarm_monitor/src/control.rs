//! Read-only control API for the monitor.
//!
//! Same ZMQ REP / JSON envelope shape as the coordinator's and cache's
//! control APIs.
//!
//! # Supported Operations
//!
//! - `Metrics` - system-wide and per-worker aggregates
//! - `Alerts` - currently active and recently resolved alerts
//! - `Health` - liveness/readiness check

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum MonitorRequest {
    Metrics,
    Alerts,
    Health,
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum MonitorResponse {
    Metrics(SystemMetricsInfo),
    Alerts(Vec<AlertInfo>),
    Health(HealthInfo),
    Pong,
    Error { code: String, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetricsInfo {
    pub total_builds: u64,
    pub builds_succeeded: u64,
    pub builds_failed: u64,
    pub success_rate: f64,
    pub avg_build_time_ms: f64,
    pub queue_length: usize,
    pub active_worker_count: usize,
    pub cache_hit_rate: Option<f64>,
    pub workers: Vec<WorkerMetricsInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetricsInfo {
    pub worker_id: String,
    pub status: String,
    pub active_build_count: usize,
    pub max_concurrent_builds: usize,
    pub mean_duration_ms: f64,
    pub builds_completed: u64,
    pub builds_failed: u64,
    pub cpu_percent: Option<f64>,
    pub memory_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertInfo {
    pub id: String,
    pub metric: String,
    pub severity: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub triggered_at: String,
    pub resolved: bool,
    pub resolved_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthInfo {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

impl MonitorResponse {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_request_roundtrips() {
        let req = MonitorRequest::Metrics;
        let json = serde_json::to_string(&req).unwrap();
        let parsed: MonitorRequest = serde_json::from_str(&json).unwrap();
        matches!(parsed, MonitorRequest::Metrics);
    }

    #[test]
    fn error_response_roundtrips() {
        let resp = MonitorResponse::error("not_found", "no such alert");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("not_found"));
    }

    #[test]
    fn alerts_response_roundtrips() {
        let resp = MonitorResponse::Alerts(vec![AlertInfo {
            id: "a1".to_string(),
            metric: "build_failure_rate".to_string(),
            severity: "warning".to_string(),
            message: "failure rate above threshold".to_string(),
            value: 0.3,
            threshold: 0.2,
            triggered_at: "2026-01-01T00:00:00Z".to_string(),
            resolved: false,
            resolved_at: None,
        }]);
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: MonitorResponse = serde_json::from_str(&json).unwrap();
        match parsed {
            MonitorResponse::Alerts(alerts) => assert_eq!(alerts.len(), 1),
            _ => panic!("wrong variant"),
        }
    }
}
