//! Error types for placidtest

use thiserror::Error;

/// Result type alias using the placidtest Error
pub type Result<T> = std::result::Result<T, Error>;

/// Placidtest error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to start browser: {0}")]
    Launch(String),

    #[error("unable to connect to browser at {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("module server error: {0}")]
    Server(String),

    #[error("{0}")]
    Usage(String),

    #[error("test failed: {0}")]
    TestFailure(String),

    /// Thrown by `debug()` to halt teardown and leave the page open.
    /// Distinguishable from a real failure so the runner can skip cleanup.
    #[error("[debug mode] teardown halted, close the browser tab to continue")]
    DebugHalt,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("browser protocol error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
}

impl Error {
    /// True for the `debug()` teardown-halt signal.
    pub fn is_debug_halt(&self) -> bool {
        matches!(self, Error::DebugHalt)
    }
}
