//! Build farm coordinator.
//!
//! Usage:
//!     buildfarm-coordinator --control-addr tcp://127.0.0.1:5556 --request-addr tcp://127.0.0.1:5555

use buildfarm_coordinator::Coordinator;
use buildfarm_logging::LogConfig;
use buildfarm_protocol::{config::CoordinatorConfig, defaults};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "buildfarm-coordinator", about = "Control plane for the build farm")]
struct Args {
    /// ROUTER bind address for worker registration/heartbeat/dispatch
    #[arg(long, env = "BUILDFARM_COORDINATOR_CONTROL_ADDR", default_value = defaults::DEFAULT_COORDINATOR_CONTROL_ADDR)]
    control_addr: String,

    /// REP bind address for the client Request API
    #[arg(long, env = "BUILDFARM_COORDINATOR_REQUEST_ADDR", default_value = defaults::DEFAULT_COORDINATOR_REQUEST_ADDR)]
    request_addr: String,

    /// Maximum number of queued builds before Submit is rejected
    #[arg(long, env = "BUILDFARM_COORDINATOR_QUEUE_CAPACITY", default_value_t = defaults::DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Maximum wall-clock time a dispatched build may run before being cancelled
    #[arg(long, env = "BUILDFARM_COORDINATOR_PER_BUILD_TIMEOUT_SECS", default_value_t = defaults::DEFAULT_PER_BUILD_TIMEOUT_SECS)]
    per_build_timeout_secs: u64,

    /// How long a build may sit queued with no eligible worker before it is
    /// failed as worker_unavailable
    #[arg(long, env = "BUILDFARM_COORDINATOR_DISPATCH_TIMEOUT_SECS", default_value_t = defaults::DEFAULT_DISPATCH_TIMEOUT_SECS)]
    dispatch_timeout_secs: u64,

    /// Maximum dispatch attempts before a build is marked failed
    #[arg(long, env = "BUILDFARM_COORDINATOR_MAX_ATTEMPTS", default_value_t = defaults::DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Seconds of missed heartbeats before a worker is declared lost
    #[arg(long, env = "BUILDFARM_COORDINATOR_LIVENESS_TIMEOUT_SECS", default_value_t = defaults::DEFAULT_LIVENESS_TIMEOUT_SECS)]
    liveness_timeout_secs: u64,

    /// Expected worker heartbeat cadence
    #[arg(long, env = "BUILDFARM_COORDINATOR_HEARTBEAT_INTERVAL_SECS", default_value_t = defaults::DEFAULT_HEARTBEAT_INTERVAL_SECS)]
    heartbeat_interval_secs: u64,

    /// Directory for the periodic build-table snapshot
    #[arg(long, env = "BUILDFARM_COORDINATOR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// PUSH address for fire-and-forget monitor event notifications; omit to disable
    #[arg(long, env = "BUILDFARM_COORDINATOR_MONITOR_EVENT_ADDR")]
    monitor_event_addr: Option<String>,

    #[arg(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    buildfarm_logging::init_logging(LogConfig {
        app_name: "buildfarm-coordinator",
        verbose: args.verbose,
        tui_mode: false,
    })?;

    let data_dir = args
        .data_dir
        .unwrap_or_else(|| buildfarm_protocol::paths::default_data_dir().join("coordinator"));

    let config = CoordinatorConfig {
        request_addr: args.request_addr,
        control_addr: args.control_addr,
        queue_capacity: args.queue_capacity,
        per_build_timeout: Duration::from_secs(args.per_build_timeout_secs),
        dispatch_timeout: Duration::from_secs(args.dispatch_timeout_secs),
        max_attempts: args.max_attempts,
        liveness_timeout: Duration::from_secs(args.liveness_timeout_secs),
        heartbeat_interval: Duration::from_secs(args.heartbeat_interval_secs),
        data_dir,
        monitor_event_addr: args.monitor_event_addr,
    };

    tracing::info!(
        control_addr = %config.control_addr,
        request_addr = %config.request_addr,
        queue_capacity = config.queue_capacity,
        "starting buildfarm-coordinator"
    );

    let mut coordinator = Coordinator::bind(config)?;

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        tracing::info!("received shutdown signal");
        let _ = stop_tx.send(());
    })?;

    coordinator.run_with_shutdown(stop_rx)
}
