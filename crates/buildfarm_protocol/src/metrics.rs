//! Canonical metric keys reported in heartbeats, build receipts, and
//! polled by the monitor. Use these constants everywhere to avoid
//! stringly-typed drift between components.

/// Worker CPU utilization, percent (0-100+, may exceed 100 on multi-core).
pub const CPU_PERCENT: &str = "cpu_percent";
/// Worker resident memory, bytes.
pub const MEMORY_BYTES: &str = "memory_bytes";
/// Build wall-clock duration, milliseconds.
pub const BUILD_DURATION_MS: &str = "build_duration_ms";
/// Fraction of cache lookups that hit, over the monitor's collection window.
pub const CACHE_HIT_RATE: &str = "cache_hit_rate";
/// Number of builds currently queued at the coordinator.
pub const QUEUE_LENGTH: &str = "queue_length";
/// Number of workers in the active state.
pub const ACTIVE_WORKER_COUNT: &str = "active_worker_count";
/// Fraction of registered workers that are not lost.
pub const WORKER_LIVENESS_FRACTION: &str = "worker_liveness_fraction";
/// Fraction of completed builds, over the monitor's collection window, that
/// failed or timed out.
pub const BUILD_FAILURE_RATE: &str = "build_failure_rate";
/// Fraction of cache storage capacity currently occupied.
pub const CACHE_SATURATION_FRACTION: &str = "cache_saturation_fraction";
