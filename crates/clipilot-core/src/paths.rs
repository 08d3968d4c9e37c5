//! Resolution of the on-disk layout under the user data directory.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the data directory created under the user's home.
const DATA_DIR_NAME: &str = ".clipilot";

/// Resolves the clipilot data directory.
///
/// On Termux the filesystem root is not writable and `$HOME` lives under the
/// install prefix, so when `TERMUX_VERSION` is set the directory is anchored
/// at `$PREFIX/home` if `dirs` cannot produce a home.
pub fn data_dir() -> io::Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(DATA_DIR_NAME));
    }
    if env::var("TERMUX_VERSION").is_ok() {
        if let Ok(prefix) = env::var("PREFIX") {
            return Ok(PathBuf::from(prefix).join("home").join(DATA_DIR_NAME));
        }
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        "Could not determine a home directory for the clipilot data dir.",
    ))
}

/// Creates the data directory and returns it.
pub fn initialize_data_dir(base: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(base)?;
    Ok(base.to_path_buf())
}

/// Path of the store file inside the data directory.
pub fn db_path(base: &Path) -> PathBuf {
    base.join("clipilot.db")
}

/// Path of the append-only journey log inside the data directory.
pub fn journey_path(base: &Path) -> PathBuf {
    base.join("journey.ndjson")
}

/// Path of the plain-text configuration file inside the data directory.
pub fn config_path(base: &Path) -> PathBuf {
    base.join("config")
}
