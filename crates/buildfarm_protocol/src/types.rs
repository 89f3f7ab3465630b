//! Protocol payload types shared by every build-farm component.

use buildfarm_ids::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// BuildId — canonical identifier across all crates
// ============================================================================

/// Coordinator-assigned, monotonically increasing build identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default,
)]
#[serde(transparent)]
pub struct BuildId(u64);

impl BuildId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BuildId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<BuildId> for u64 {
    fn from(value: BuildId) -> Self {
        value.0
    }
}

impl FromStr for BuildId {
    type Err = BuildIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<u64>()
            .map_err(|_| BuildIdError::Parse(s.to_string()))?;
        Ok(BuildId::new(value))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildIdError {
    #[error("invalid build id: {0}")]
    Parse(String),
}

// ============================================================================
// Lifecycle state (BuildRecord.state)
// ============================================================================

/// `BuildRecord` lifecycle state. A build transitions to exactly one
/// terminal state and stays there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    #[default]
    Queued,
    Dispatched,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl BuildState {
    pub const ALL: &'static [BuildState] = &[
        BuildState::Queued,
        BuildState::Dispatched,
        BuildState::Running,
        BuildState::Succeeded,
        BuildState::Failed,
        BuildState::Cancelled,
        BuildState::TimedOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::Queued => "queued",
            BuildState::Dispatched => "dispatched",
            BuildState::Running => "running",
            BuildState::Succeeded => "succeeded",
            BuildState::Failed => "failed",
            BuildState::Cancelled => "cancelled",
            BuildState::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildState::Succeeded
                | BuildState::Failed
                | BuildState::Cancelled
                | BuildState::TimedOut
        )
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BuildState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(BuildState::Queued),
            "dispatched" => Ok(BuildState::Dispatched),
            "running" => Ok(BuildState::Running),
            "succeeded" => Ok(BuildState::Succeeded),
            "failed" => Ok(BuildState::Failed),
            "cancelled" | "canceled" => Ok(BuildState::Cancelled),
            "timed_out" => Ok(BuildState::TimedOut),
            _ => Err(format!("invalid build state: '{}'", s)),
        }
    }
}

// ============================================================================
// Worker status
// ============================================================================

/// Worker status as observed by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Active,
    Busy,
    Draining,
    Lost,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Active => "active",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Draining => "draining",
            WorkerStatus::Lost => "lost",
        }
    }

    /// Eligible to receive a new dispatch.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, WorkerStatus::Active)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Worker-side process state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerLifecycle {
    #[default]
    Starting,
    Registering,
    Active,
    Busy,
    Draining,
    Stopped,
}

impl fmt::Display for WorkerLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerLifecycle::Starting => "starting",
            WorkerLifecycle::Registering => "registering",
            WorkerLifecycle::Active => "active",
            WorkerLifecycle::Busy => "busy",
            WorkerLifecycle::Draining => "draining",
            WorkerLifecycle::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// OpCode.REGISTER (Worker -> Coordinator)
// ============================================================================

/// Payload for `OpCode::Register`. Worker -> Coordinator handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub worker_id: WorkerId,
    pub advertise_address: String,
    pub capabilities: Vec<String>,
    pub max_concurrent_builds: usize,
}

/// Payload for `OpCode::Unregister`. Worker -> Coordinator graceful drain notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterPayload {
    pub worker_id: WorkerId,
}

// ============================================================================
// OpCode.HEARTBEAT (Worker -> Coordinator)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub active_build_count: usize,
    pub active_build_ids: Vec<BuildId>,
    /// Optional lightweight resource snapshot, consumed by the monitor.
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    #[serde(default)]
    pub memory_bytes: Option<u64>,
}

// ============================================================================
// OpCode.DISPATCH (Coordinator -> Worker)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchCommand {
    pub build_id: BuildId,
    pub project_path: String,
    pub task_name: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
    pub cache_enabled: bool,
    /// Attempt count so far (1 on first dispatch).
    pub attempt: u32,
    /// Ignorable external advisory hint, logged but not acted on.
    #[serde(default)]
    pub advisory_hint: Option<String>,
}

/// Payload for `OpCode::Cancel`. Coordinator -> Worker abort request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelCommand {
    pub build_id: BuildId,
}

// ============================================================================
// OpCode.COMPLETE (Worker -> Coordinator)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildMetrics {
    #[serde(default)]
    pub step_durations_ms: HashMap<String, u64>,
    pub cache_hit: bool,
    #[serde(default)]
    pub test_count: Option<u64>,
    #[serde(default)]
    pub test_failures: Option<u64>,
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    #[serde(default)]
    pub memory_bytes: Option<u64>,
}

impl Default for BuildMetrics {
    fn default() -> Self {
        Self {
            step_durations_ms: HashMap::new(),
            cache_hit: false,
            test_count: None,
            test_failures: None,
            cpu_percent: None,
            memory_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    pub duration_ms: u64,
    pub artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub metrics: BuildMetrics,
}

// ============================================================================
// Bidirectional error payload
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_id_roundtrips_through_string() {
        let id = BuildId::new(42);
        let parsed: BuildId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn build_state_terminal_classification() {
        assert!(BuildState::Succeeded.is_terminal());
        assert!(BuildState::Failed.is_terminal());
        assert!(BuildState::Cancelled.is_terminal());
        assert!(BuildState::TimedOut.is_terminal());
        assert!(!BuildState::Queued.is_terminal());
        assert!(!BuildState::Dispatched.is_terminal());
        assert!(!BuildState::Running.is_terminal());
    }

    #[test]
    fn build_state_from_str_accepts_canonical_and_lowercase() {
        assert_eq!("QUEUED".parse::<BuildState>().unwrap(), BuildState::Queued);
        assert_eq!(
            "timed_out".parse::<BuildState>().unwrap(),
            BuildState::TimedOut
        );
        assert!("bogus".parse::<BuildState>().is_err());
    }

    #[test]
    fn worker_status_dispatchable() {
        assert!(WorkerStatus::Active.is_dispatchable());
        assert!(!WorkerStatus::Busy.is_dispatchable());
        assert!(!WorkerStatus::Draining.is_dispatchable());
        assert!(!WorkerStatus::Lost.is_dispatchable());
    }
}
