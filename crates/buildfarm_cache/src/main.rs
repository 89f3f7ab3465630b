//! Build farm artifact cache.
//!
//! Usage:
//!     buildfarm-cache --listen tcp://127.0.0.1:5557 --storage-root ./cache-data

use buildfarm_cache::{server::CacheServer, CacheStore};
use buildfarm_logging::LogConfig;
use buildfarm_protocol::defaults;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "buildfarm-cache", about = "Build artifact cache for the build farm")]
struct Args {
    /// ZMQ bind address for the control API
    #[arg(long, env = "BUILDFARM_CACHE_LISTEN", default_value = defaults::DEFAULT_CACHE_ADDR)]
    listen: String,

    /// Directory to store cached artifacts under
    #[arg(long, env = "BUILDFARM_CACHE_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,

    /// Maximum cache size in bytes
    #[arg(long, env = "BUILDFARM_CACHE_MAX_SIZE", default_value_t = defaults::DEFAULT_CACHE_MAX_SIZE_BYTES)]
    max_size_bytes: u64,

    /// Default entry TTL in seconds
    #[arg(long, env = "BUILDFARM_CACHE_DEFAULT_TTL_SECS", default_value_t = defaults::DEFAULT_CACHE_TTL_SECS)]
    default_ttl_secs: u64,

    /// Fraction of max size at which LRU eviction kicks in
    #[arg(long, default_value_t = defaults::DEFAULT_CACHE_HIGH_WATER_FRACTION)]
    high_water_fraction: f64,

    #[arg(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    buildfarm_logging::init_logging(LogConfig {
        app_name: "buildfarm-cache",
        verbose: args.verbose,
        tui_mode: false,
    })?;

    let storage_root = args
        .storage_root
        .unwrap_or_else(|| buildfarm_protocol::paths::default_data_dir().join("cache"));

    tracing::info!(listen = %args.listen, storage_root = %storage_root.display(), "starting buildfarm-cache");

    let store = Arc::new(CacheStore::open(
        storage_root,
        args.max_size_bytes,
        Duration::from_secs(args.default_ttl_secs),
        args.high_water_fraction,
    )?);

    let server = CacheServer::bind(&args.listen, store)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        tracing::info!("received shutdown signal");
        shutdown_handler.store(true, Ordering::Relaxed);
    })?;

    server.run(&shutdown)
}
