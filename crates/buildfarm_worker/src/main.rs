//! Build farm worker.
//!
//! Usage:
//!     buildfarm-worker --connect tcp://127.0.0.1:5555 --build-root ./builds

use anyhow::Context;
use buildfarm_ids::WorkerId;
use buildfarm_logging::LogConfig;
use buildfarm_protocol::{config::WorkerConfig, defaults};
use buildfarm_worker::Worker;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "buildfarm-worker", about = "Build execution agent for the build farm")]
struct Args {
    /// Coordinator DEALER/ROUTER address to register and receive dispatches on
    #[arg(long, env = "BUILDFARM_WORKER_CONNECT", default_value = defaults::DEFAULT_COORDINATOR_REQUEST_ADDR)]
    connect: String,

    /// Address advertised to the coordinator for this worker (informational)
    #[arg(long, env = "BUILDFARM_WORKER_ADVERTISE_ADDRESS", default_value = "")]
    advertise_address: String,

    /// Comma-separated capability tags this worker offers
    #[arg(long, env = "BUILDFARM_WORKER_CAPABILITIES", value_delimiter = ',')]
    capabilities: Vec<String>,

    /// Maximum number of builds this worker executes concurrently
    #[arg(long, env = "BUILDFARM_WORKER_MAX_CONCURRENT_BUILDS", default_value_t = defaults::DEFAULT_MAX_CONCURRENT_BUILDS)]
    max_concurrent_builds: usize,

    /// Worker ID (auto-generated if not provided)
    #[arg(long, env = "BUILDFARM_WORKER_ID")]
    worker_id: Option<String>,

    /// Directory under which per-build working directories are created
    #[arg(long, env = "BUILDFARM_WORKER_BUILD_ROOT")]
    build_root: Option<PathBuf>,

    /// Artifact cache address; omit to disable cache lookups entirely
    #[arg(long, env = "BUILDFARM_WORKER_CACHE_ADDRESS", default_value = defaults::DEFAULT_CACHE_ADDR)]
    cache_address: String,

    /// Heartbeat interval in seconds
    #[arg(long, env = "BUILDFARM_WORKER_HEARTBEAT_INTERVAL_SECS", default_value_t = defaults::DEFAULT_HEARTBEAT_INTERVAL_SECS)]
    heartbeat_interval_secs: u64,

    #[arg(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    buildfarm_logging::init_logging(LogConfig {
        app_name: "buildfarm-worker",
        verbose: args.verbose,
        tui_mode: false,
    })?;

    let worker_id = match args.worker_id {
        Some(id) => WorkerId::parse(&id).context("--worker-id must be a UUID")?,
        None => WorkerId::new(),
    };

    let build_root = args
        .build_root
        .unwrap_or_else(|| buildfarm_protocol::paths::default_data_dir().join("builds"));

    let config = WorkerConfig {
        id: worker_id.clone(),
        coordinator_address: args.connect.clone(),
        advertise_address: args.advertise_address,
        max_concurrent_builds: args.max_concurrent_builds,
        capabilities: args.capabilities,
        build_root,
        heartbeat_interval: Duration::from_secs(args.heartbeat_interval_secs),
        cache_address: Some(args.cache_address).filter(|s| !s.is_empty()),
    };

    tracing::info!(
        worker_id = %worker_id,
        coordinator = %args.connect,
        max_concurrent_builds = config.max_concurrent_builds,
        "starting buildfarm-worker"
    );

    let worker = Worker::new(config);
    let handle = worker.handle();

    ctrlc::set_handler(move || {
        tracing::info!("received shutdown signal, draining");
        handle.request_shutdown();
    })?;

    worker.run()?;
    Ok(())
}
