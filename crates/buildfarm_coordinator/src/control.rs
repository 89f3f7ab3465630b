//! Request API for the build farm coordinator.
//!
//! Uses a ZMQ REP socket with JSON request/response, same envelope shape
//! used by the cache and monitor control APIs.
//!
//! # Supported Operations
//!
//! - `Submit` - admit a new build request onto the queue
//! - `GetStatus` - fetch a build's current record
//! - `ListWorkers` - list the registered worker pool
//! - `Health` - liveness/readiness check

use buildfarm_ids::WorkerId;
use buildfarm_protocol::{BuildId, BuildResult, BuildState, WorkerStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RequestApi {
    Submit {
        project_path: String,
        task_name: String,
        #[serde(default)]
        options: HashMap<String, String>,
        #[serde(default)]
        cache_enabled: bool,
    },
    GetStatus {
        build_id: BuildId,
    },
    ListWorkers,
    /// System-wide build aggregates, polled by the monitor.
    QueueStats,
    Health,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RequestApiResponse {
    Submitted { build_id: BuildId },
    Status(Option<BuildRecordInfo>),
    Workers(Vec<WorkerInfo>),
    QueueStats(QueueStatsInfo),
    Health(HealthInfo),
    Error { code: String, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatsInfo {
    pub queue_length: usize,
    pub total_builds: u64,
    pub builds_succeeded: u64,
    pub builds_failed: u64,
    pub avg_build_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecordInfo {
    pub build_id: BuildId,
    pub project_path: String,
    pub task_name: String,
    pub state: BuildState,
    pub assigned_worker: Option<WorkerId>,
    pub attempt: u32,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub result: Option<BuildResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub advertise_address: String,
    pub capabilities: Vec<String>,
    pub status: WorkerStatus,
    pub active_build_count: usize,
    pub max_concurrent_builds: usize,
    pub builds_completed: u64,
    pub builds_failed: u64,
    pub mean_duration_ms: f64,
    pub last_heartbeat: String,
    pub cpu_percent: Option<f64>,
    pub memory_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthInfo {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

impl RequestApiResponse {
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
    fn submit_request_roundtrips() {
        let req = RequestApi::Submit {
            project_path: "/repo".to_string(),
            task_name: "assemble".to_string(),
            options: HashMap::new(),
            cache_enabled: true,
        };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: RequestApi = serde_json::from_str(&json).unwrap();
        match parsed {
            RequestApi::Submit { project_path, task_name, cache_enabled, .. } => {
                assert_eq!(project_path, "/repo");
                assert_eq!(task_name, "assemble");
                assert!(cache_enabled);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn get_status_request_roundtrips() {
        let req = RequestApi::GetStatus { build_id: BuildId::new(7) };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: RequestApi = serde_json::from_str(&json).unwrap();
        match parsed {
            RequestApi::GetStatus { build_id } => assert_eq!(build_id, BuildId::new(7)),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn queue_stats_response_roundtrips() {
        let resp = RequestApiResponse::QueueStats(QueueStatsInfo {
            queue_length: 3,
            total_builds: 10,
            builds_succeeded: 8,
            builds_failed: 2,
            avg_build_time_ms: 1250.0,
        });
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: RequestApiResponse = serde_json::from_str(&json).unwrap();
        match parsed {
            RequestApiResponse::QueueStats(stats) => assert_eq!(stats.queue_length, 3),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn error_response_roundtrips() {
        let resp = RequestApiResponse::error("not_found", "no such build");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("not_found"));
    }
}
