//! Build farm coordinator library.
//!
//! Exposes the coordinator control-plane, its Request API types, and its
//! metrics for library usage and testing.

pub mod control;
pub mod coordinator;
pub mod metrics;

pub use control::{
    BuildRecordInfo, HealthInfo, QueueStatsInfo, RequestApi, RequestApiResponse, WorkerInfo,
};
pub use coordinator::Coordinator;
pub use metrics::METRICS;
