//! Build farm monitor.
//!
//! Usage:
//!     buildfarm-monitor --control-addr tcp://127.0.0.1:5558 --event-addr tcp://127.0.0.1:5559

use buildfarm_logging::LogConfig;
use buildfarm_monitor::Monitor;
use buildfarm_protocol::{config::MonitorConfig, defaults};
use clap::Parser;
use std::collections::HashMap;
use std::sync::mpsc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "buildfarm-monitor", about = "Metrics aggregation and alerting for the build farm")]
struct Args {
    /// REP bind address for the monitor's own Metrics/Alerts/Health API
    #[arg(long, env = "BUILDFARM_MONITOR_CONTROL_ADDR", default_value = defaults::DEFAULT_MONITOR_CONTROL_ADDR)]
    control_addr: String,

    /// PULL bind address the coordinator pushes build/worker events to
    #[arg(long, env = "BUILDFARM_MONITOR_EVENT_ADDR", default_value = defaults::DEFAULT_MONITOR_EVENT_ADDR)]
    event_addr: String,

    /// Coordinator Request API address, polled for worker list and queue stats
    #[arg(long, env = "BUILDFARM_MONITOR_COORDINATOR_REQUEST_ADDR", default_value = defaults::DEFAULT_COORDINATOR_REQUEST_ADDR)]
    coordinator_request_addr: String,

    /// Cache control API address, polled for saturation; omit to disable cache alerting
    #[arg(long, env = "BUILDFARM_MONITOR_CACHE_REQUEST_ADDR", default_value = defaults::DEFAULT_CACHE_ADDR)]
    cache_request_addr: String,

    /// Seconds between collection ticks against the coordinator and cache
    #[arg(long, env = "BUILDFARM_MONITOR_COLLECTION_INTERVAL_SECS", default_value_t = defaults::DEFAULT_MONITOR_COLLECTION_INTERVAL_SECS)]
    collection_interval_secs: u64,

    /// How long rolling metric samples are retained
    #[arg(long, env = "BUILDFARM_MONITOR_RETENTION_WINDOW_SECS", default_value_t = defaults::DEFAULT_MONITOR_RETENTION_WINDOW_SECS)]
    retention_window_secs: u64,

    /// Consecutive sub-threshold ticks required to resolve an active alert
    #[arg(long, env = "BUILDFARM_MONITOR_RECOVERY_INTERVALS", default_value_t = defaults::DEFAULT_MONITOR_RECOVERY_INTERVALS)]
    recovery_intervals: u32,

    /// Comma-separated metric=warning-threshold overrides, e.g. "cpu_percent=85,build_failure_rate=0.1"
    #[arg(long, env = "BUILDFARM_MONITOR_ALERT_THRESHOLDS", value_delimiter = ',')]
    alert_thresholds: Vec<String>,

    #[arg(long)]
    verbose: bool,
}

fn parse_alert_thresholds(pairs: Vec<String>, mut base: HashMap<String, f64>) -> HashMap<String, f64> {
    for pair in pairs {
        let Some((metric, value)) = pair.split_once('=') else {
            tracing::warn!(pair = %pair, "ignoring malformed alert threshold override");
            continue;
        };
        match value.trim().parse::<f64>() {
            Ok(v) => {
                base.insert(metric.trim().to_string(), v);
            }
            Err(e) => tracing::warn!(pair = %pair, error = %e, "ignoring malformed alert threshold override"),
        }
    }
    base
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    buildfarm_logging::init_logging(LogConfig {
        app_name: "buildfarm-monitor",
        verbose: args.verbose,
        tui_mode: false,
    })?;

    let defaults_config = MonitorConfig::default();

    let config = MonitorConfig {
        control_addr: args.control_addr,
        event_addr: args.event_addr,
        coordinator_request_addr: args.coordinator_request_addr,
        cache_request_addr: Some(args.cache_request_addr).filter(|s| !s.is_empty()),
        collection_interval: Duration::from_secs(args.collection_interval_secs),
        retention_window: Duration::from_secs(args.retention_window_secs),
        recovery_intervals: args.recovery_intervals,
        alert_thresholds: parse_alert_thresholds(args.alert_thresholds, defaults_config.alert_thresholds),
    };

    tracing::info!(
        control_addr = %config.control_addr,
        event_addr = %config.event_addr,
        coordinator_request_addr = %config.coordinator_request_addr,
        "starting buildfarm-monitor"
    );

    let mut monitor = Monitor::bind(config)?;

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        tracing::info!("received shutdown signal");
        let _ = stop_tx.send(());
    })?;

    monitor.run_with_shutdown(stop_rx)
}
