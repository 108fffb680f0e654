//! Placidtest Common Library
//!
//! Shared types, errors, and path helpers for the placidtest harness.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ArbitrationKey, BrowserKind, Mode};

/// Placidtest version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default data directory, shared by every process on the machine
pub fn default_data_path() -> std::path::PathBuf {
    if let Some(dir) = std::env::var_os("PLACIDTEST_DATA_DIR") {
        return std::path::PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".placidtest")
}

/// Default path of the shared browser endpoint document
pub fn default_store_path() -> std::path::PathBuf {
    default_data_path().join("browsers.json")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
