//! # Data Paths
//!
//! Centralized definitions for the files kept under the data directory.

use std::path::{Path, PathBuf};

pub const DEFAULT_DATA_DIR: &str = "data";
pub const CONFIG_FILE: &str = "config.yaml";
pub const STORE_FILE: &str = "store.json";
pub const LOG_FILE: &str = "session.log";

/// Returns the default config location (e.g. "data/config.yaml")
pub fn default_config_path() -> PathBuf {
    Path::new(DEFAULT_DATA_DIR).join(CONFIG_FILE)
}

/// Returns the path of the card store snapshot
pub fn store_path(data_dir: &str) -> PathBuf {
    Path::new(data_dir).join(STORE_FILE)
}
