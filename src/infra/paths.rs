// src/infra/paths.rs — Home and data directory layout
//
// All paths respect the STIMGEN_HOME environment variable for isolation.
// When STIMGEN_HOME is set, config and data live under that directory.
// When unset, config uses ~/.stimgen/ and data uses XDG_DATA_HOME/stimgen.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Returns the STIMGEN_HOME override, if set.
fn stimgen_home() -> Option<PathBuf> {
    std::env::var_os("STIMGEN_HOME").map(PathBuf::from)
}

/// Configuration directory: $STIMGEN_HOME/ or ~/.stimgen/
pub fn config_dir() -> PathBuf {
    if let Some(home) = stimgen_home() {
        return home;
    }
    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(".stimgen"),
        None => PathBuf::from(".stimgen"),
    }
}

/// Data directory: $STIMGEN_HOME/data/ or ~/.local/share/stimgen/
pub fn data_dir() -> PathBuf {
    if let Some(home) = stimgen_home() {
        return home.join("data");
    }
    match ProjectDirs::from("", "", "stimgen") {
        Some(dirs) => dirs.data_local_dir().to_path_buf(),
        None => config_dir().join("data"),
    }
}

pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Durable run-state files, one JSON document per run id.
pub fn sessions_dir() -> PathBuf {
    data_dir().join("sessions")
}

/// Default location for CSV artifacts written by `stimgen run`.
pub fn outputs_dir() -> PathBuf {
    data_dir().join("outputs")
}
