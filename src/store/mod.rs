//! Persisted record of the staged artifact and derived runtime facts.
//!
//! The [`VersionStore`] is a small JSON document next to the staged artifact.
//! It records the artifact version currently on disk plus two facts derived at
//! launch time: whether the server was confirmed running, and the final
//! reachable URL handed to the display surface. The orchestrator is the only
//! writer; reads and writes never overlap.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::core::{LaunchError, Result};

const fn default_version() -> u64 {
    1
}

/// Persistent launcher state, serialized as JSON.
#[derive(Debug, Serialize, Deserialize)]
pub struct VersionStore {
    /// Version of the artifact staged on disk. Defaults to 1 on first run and
    /// only ever moves forward.
    #[serde(default = "default_version")]
    artifact_version: u64,
    /// Epoch milliseconds of the last upgrade check, used by the daily policy.
    #[serde(default)]
    last_update_check_ms: i64,
    /// Whether the staged server was confirmed reachable this run.
    #[serde(default)]
    server_running: bool,
    /// The URL handed to the display surface once the server was reachable.
    #[serde(default)]
    final_url: Option<String>,
    #[serde(skip)]
    path: PathBuf,
}

impl VersionStore {
    /// Load the store from `path`, falling back to defaults when the file
    /// does not exist yet.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("no version store at {}, using defaults", path.display());
            return Ok(Self {
                artifact_version: default_version(),
                last_update_check_ms: 0,
                server_running: false,
                final_url: None,
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).await.map_err(|e| LaunchError::Store {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let mut store: Self = serde_json::from_str(&content).map_err(|e| LaunchError::Store {
            reason: format!("failed to parse {}: {e}", path.display()),
        })?;
        store.path = path.to_path_buf();
        Ok(store)
    }

    /// Persist the current record to disk.
    pub async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| LaunchError::Store {
            reason: format!("failed to serialize version store: {e}"),
        })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, content).await.map_err(|e| LaunchError::Store {
            reason: format!("failed to write {}: {e}", self.path.display()),
        })?;
        debug!("saved version store to {}", self.path.display());
        Ok(())
    }

    pub fn artifact_version(&self) -> u64 {
        self.artifact_version
    }

    /// Record a newly staged artifact version.
    ///
    /// The stored version is monotonically non-decreasing; a lower value is
    /// ignored rather than written back.
    pub fn bump_artifact_version(&mut self, version: u64) {
        self.artifact_version = self.artifact_version.max(version);
    }

    pub fn last_update_check_ms(&self) -> i64 {
        self.last_update_check_ms
    }

    pub fn set_last_update_check_ms(&mut self, epoch_ms: i64) {
        self.last_update_check_ms = epoch_ms;
    }

    pub fn server_running(&self) -> bool {
        self.server_running
    }

    pub fn set_server_running(&mut self, running: bool) {
        self.server_running = running;
    }

    pub fn final_url(&self) -> Option<&str> {
        self.final_url.as_deref()
    }

    pub fn set_final_url(&mut self, url: impl Into<String>) {
        self.final_url = Some(url.into());
    }
}
