//! Error handling for the launcher.
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** for precise handling in code
//! 2. **Human-readable messages** the embedding shell can surface directly
//!
//! # Error Categories
//!
//! - **Configuration**: [`LaunchError::Config`]: missing or invalid settings,
//!   fatal before the pipeline starts.
//! - **Network**: [`LaunchError::Network`], [`LaunchError::BadStatus`],
//!   [`LaunchError::TooManyRedirects`]: version-check failures degrade to
//!   "proceed with current version"; download failures are fatal for the
//!   launch cycle.
//! - **Staging**: [`LaunchError::Stage`], [`LaunchError::EntrypointMissing`].
//! - **Launch**: [`LaunchError::PortsExhausted`], [`LaunchError::Spawn`],
//!   [`LaunchError::ProcessDiedDuringGrace`], [`LaunchError::ReadinessTimeout`].
//!
//! None of these crash the process; the orchestrator reports them and simply
//! never reaches the "server running" state. Only the readiness probe retries
//! automatically; everything else retries on the next application launch.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LaunchError>;

/// The main error type for launcher operations.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// Required configuration is missing or invalid.
    ///
    /// Surfaced before orchestration begins; the embedding shell is expected
    /// to render this to the user (e.g. as a startup dialog).
    #[error("configuration error: {message}")]
    Config {
        /// Description of the missing or invalid setting
        message: String,
    },

    /// A network operation failed.
    #[error("network error during {operation}: {reason}")]
    Network {
        /// The network operation that failed (e.g. "download", "upgrade check")
        operation: String,
        /// Reason for the failure
        reason: String,
    },

    /// The artifact host answered with an unexpected HTTP status.
    #[error("download failed: HTTP {status}")]
    BadStatus {
        /// The non-200, non-redirect status code received
        status: u16,
    },

    /// The redirect chain exceeded the configured depth.
    #[error("too many redirects (limit {limit})")]
    TooManyRedirects {
        /// Maximum redirect depth that was exceeded
        limit: usize,
    },

    /// Archive extraction or directory cleanup failed.
    #[error("failed to stage archive at {path}: {reason}")]
    Stage {
        /// Path of the archive or target directory involved
        path: String,
        /// Specific reason for the staging failure
        reason: String,
    },

    /// The server entry point is still missing after staging.
    ///
    /// Unrecoverable within this launch cycle.
    #[error("server entry point not found: {path}")]
    EntrypointMissing {
        /// Expected path of the entry point
        path: String,
    },

    /// No free TCP port was found within the scanned range.
    #[error("no free port found after {attempts} attempts starting at {start}")]
    PortsExhausted {
        /// First port that was probed
        start: u16,
        /// Number of consecutive ports probed
        attempts: u16,
    },

    /// The child process could not be spawned.
    #[error("failed to start server process: {reason}")]
    Spawn {
        /// Reason the spawn failed
        reason: String,
    },

    /// The child process exited before the startup grace period elapsed.
    #[error("server process exited during startup grace period")]
    ProcessDiedDuringGrace,

    /// The staged server never became reachable.
    #[error("server at {url} not ready after {attempts} attempts")]
    ReadinessTimeout {
        /// URL that was probed
        url: String,
        /// Number of attempts made before giving up
        attempts: u32,
    },

    /// The persisted version record could not be read or written.
    #[error("version store error: {reason}")]
    Store {
        /// Reason the store operation failed
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
