use std::path::PathBuf;
use std::sync::Once;

static CREATE_DIR_WARNED: Once = Once::new();

/// Resolve the build farm home directory.
///
/// Priority:
/// 1) BUILDFARM_HOME
/// 2) HOME/USERPROFILE
/// 3) ./.buildfarm
pub fn buildfarm_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("BUILDFARM_HOME") {
        return PathBuf::from(override_path);
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        return PathBuf::from(home).join(".buildfarm");
    }
    PathBuf::from(".").join(".buildfarm")
}

fn ensure_dir(dir: &PathBuf) {
    if let Err(err) = std::fs::create_dir_all(dir) {
        CREATE_DIR_WARNED.call_once(|| {
            eprintln!(
                "Warning: failed to create build farm directory {}: {}. Set BUILDFARM_HOME or pass an explicit path.",
                dir.display(),
                err
            );
        });
    }
}

/// Default data directory: ~/.buildfarm/data (snapshots, cache index, ...)
pub fn default_data_dir() -> PathBuf {
    let home = buildfarm_home();
    ensure_dir(&home);
    home.join("data")
}

/// Default logs directory: ~/.buildfarm/logs
pub fn default_logs_dir() -> PathBuf {
    let home = buildfarm_home();
    ensure_dir(&home);
    home.join("logs")
}
