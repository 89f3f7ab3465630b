//! Per-component configuration option structs.
//!
//! Each struct enumerates the recognized configuration options for that
//! component; `clap`-derived CLI structs in each binary build one of these
//! from flags/env and pass it down.

use crate::defaults;
use buildfarm_ids::WorkerId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub request_addr: String,
    pub control_addr: String,
    pub queue_capacity: usize,
    pub per_build_timeout: Duration,
    pub dispatch_timeout: Duration,
    pub max_attempts: u32,
    pub liveness_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub data_dir: PathBuf,
    pub monitor_event_addr: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            request_addr: defaults::DEFAULT_COORDINATOR_REQUEST_ADDR.to_string(),
            control_addr: defaults::DEFAULT_COORDINATOR_CONTROL_ADDR.to_string(),
            queue_capacity: defaults::DEFAULT_QUEUE_CAPACITY,
            per_build_timeout: Duration::from_secs(defaults::DEFAULT_PER_BUILD_TIMEOUT_SECS),
            dispatch_timeout: Duration::from_secs(defaults::DEFAULT_DISPATCH_TIMEOUT_SECS),
            max_attempts: defaults::DEFAULT_MAX_ATTEMPTS,
            liveness_timeout: Duration::from_secs(defaults::DEFAULT_LIVENESS_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(defaults::DEFAULT_HEARTBEAT_INTERVAL_SECS),
            data_dir: crate::paths::default_data_dir(),
            monitor_event_addr: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub id: WorkerId,
    pub coordinator_address: String,
    pub advertise_address: String,
    pub max_concurrent_builds: usize,
    pub capabilities: Vec<String>,
    pub build_root: PathBuf,
    pub heartbeat_interval: Duration,
    pub cache_address: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: WorkerId::new(),
            coordinator_address: defaults::DEFAULT_COORDINATOR_REQUEST_ADDR.to_string(),
            advertise_address: String::new(),
            max_concurrent_builds: defaults::DEFAULT_MAX_CONCURRENT_BUILDS,
            capabilities: Vec::new(),
            build_root: crate::paths::default_data_dir().join("builds"),
            heartbeat_interval: Duration::from_secs(defaults::DEFAULT_HEARTBEAT_INTERVAL_SECS),
            cache_address: Some(defaults::DEFAULT_CACHE_ADDR.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub listen_addr: String,
    pub storage_root: PathBuf,
    pub max_cache_size: u64,
    pub default_ttl: Duration,
    pub compression_enabled: bool,
    pub high_water_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            listen_addr: defaults::DEFAULT_CACHE_ADDR.to_string(),
            storage_root: crate::paths::default_data_dir().join("cache"),
            max_cache_size: defaults::DEFAULT_CACHE_MAX_SIZE_BYTES,
            default_ttl: Duration::from_secs(defaults::DEFAULT_CACHE_TTL_SECS),
            compression_enabled: false,
            high_water_fraction: defaults::DEFAULT_CACHE_HIGH_WATER_FRACTION,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub control_addr: String,
    pub event_addr: String,
    /// Coordinator Request API address the monitor polls for worker/health
    /// snapshots; not a named spec option but required to locate the
    /// coordinator, the same way `WorkerConfig::coordinator_address` is.
    pub coordinator_request_addr: String,
    /// Cache control API address, polled for saturation stats; omit to
    /// disable cache-saturation alerting.
    pub cache_request_addr: Option<String>,
    pub collection_interval: Duration,
    pub retention_window: Duration,
    pub recovery_intervals: u32,
    pub alert_thresholds: HashMap<String, f64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let mut alert_thresholds = HashMap::new();
        alert_thresholds.insert("worker_liveness_fraction".to_string(), 0.5);
        alert_thresholds.insert("build_failure_rate".to_string(), 0.2);
        alert_thresholds.insert("cpu_percent".to_string(), 90.0);
        alert_thresholds.insert("cache_saturation_fraction".to_string(), 0.95);

        Self {
            control_addr: defaults::DEFAULT_MONITOR_CONTROL_ADDR.to_string(),
            event_addr: defaults::DEFAULT_MONITOR_EVENT_ADDR.to_string(),
            coordinator_request_addr: defaults::DEFAULT_COORDINATOR_REQUEST_ADDR.to_string(),
            cache_request_addr: Some(defaults::DEFAULT_CACHE_ADDR.to_string()),
            collection_interval: Duration::from_secs(
                defaults::DEFAULT_MONITOR_COLLECTION_INTERVAL_SECS,
            ),
            retention_window: Duration::from_secs(
                defaults::DEFAULT_MONITOR_RETENTION_WINDOW_SECS,
            ),
            recovery_intervals: defaults::DEFAULT_MONITOR_RECOVERY_INTERVALS,
            alert_thresholds,
        }
    }
}
