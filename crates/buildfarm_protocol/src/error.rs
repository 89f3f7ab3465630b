//! Wire and domain error kinds shared by every component.
//!
//! The domain variants name the surface-independent error kinds every
//! component-level API discriminates on (invalid_request, queue_full, ...).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid opcode: {0}")]
    InvalidOpCode(u8),

    #[error("header too short: expected {expected} bytes, got {got}")]
    HeaderTooShort { expected: usize, got: usize },

    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("payload too large: {size} bytes exceeds max {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("expected {expected} zmq frames, got {got}")]
    InvalidFrameCount { expected: usize, got: usize },

    #[error("payload length mismatch: header says {expected}, got {got}")]
    PayloadLengthMismatch { expected: usize, got: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Named, surface-independent error kinds. Every component-level API
/// discriminates on one of these kinds rather than raw error strings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("queue full")]
    QueueFull,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no eligible worker: {0}")]
    WorkerUnavailable(String),

    #[error("build tool exited non-zero: {0}")]
    ExecutionFailed(String),

    #[error("transient io error: {0}")]
    TransientIo(String),

    #[error("worker lost: {0}")]
    WorkerLost(String),

    #[error("build timed out")]
    TimedOut,
}

impl DomainError {
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::InvalidRequest(_) => "invalid_request",
            DomainError::QueueFull => "queue_full",
            DomainError::NotFound(_) => "not_found",
            DomainError::WorkerUnavailable(_) => "worker_unavailable",
            DomainError::ExecutionFailed(_) => "execution_failed",
            DomainError::TransientIo(_) => "transient_io",
            DomainError::WorkerLost(_) => "worker_lost",
            DomainError::TimedOut => "timed_out",
        }
    }
}
