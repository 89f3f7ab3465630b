//! Build farm monitor library.
//!
//! Exposes the collection/alerting orchestrator, its control API types, the
//! rolling sample window, and the alert tracker for library usage and
//! testing.

pub mod alerts;
pub mod control;
pub mod monitor;
pub mod window;

pub use alerts::{Alert, AlertTracker, Severity};
pub use control::{
    AlertInfo, HealthInfo, MonitorRequest, MonitorResponse, SystemMetricsInfo, WorkerMetricsInfo,
};
pub use monitor::Monitor;
pub use window::SampleWindow;
