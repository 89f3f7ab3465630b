//! Canonical default values shared across coordinator/worker/cache/monitor.

pub const DEFAULT_COORDINATOR_REQUEST_ADDR: &str = "tcp://127.0.0.1:5555";
pub const DEFAULT_COORDINATOR_CONTROL_ADDR: &str = "tcp://127.0.0.1:5556";
pub const DEFAULT_CACHE_ADDR: &str = "tcp://127.0.0.1:5557";
pub const DEFAULT_MONITOR_CONTROL_ADDR: &str = "tcp://127.0.0.1:5558";
pub const DEFAULT_MONITOR_EVENT_ADDR: &str = "tcp://127.0.0.1:5559";

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_PER_BUILD_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LIVENESS_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

pub const DEFAULT_MAX_CONCURRENT_BUILDS: usize = 4;

pub const DEFAULT_CACHE_MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024 * 1024; // 10 GiB
pub const DEFAULT_CACHE_TTL_SECS: u64 = 7 * 24 * 3600;
pub const DEFAULT_CACHE_HIGH_WATER_FRACTION: f64 = 0.9;

pub const DEFAULT_MONITOR_COLLECTION_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_MONITOR_RETENTION_WINDOW_SECS: u64 = 24 * 3600;
pub const DEFAULT_MONITOR_RECOVERY_INTERVALS: u32 = 3;

pub const CANCELLED_BY_USER_MESSAGE: &str = "Cancelled by user";
