//! Launcher configuration.
//!
//! Configuration is supplied by the embedding shell, normally as a TOML file
//! (`launchpad.toml`). Every field can also be provided through the process
//! environment (`LAUNCHPAD_ACCESS_KEY` and friends), which covers shells that
//! inject settings via a `.env` file instead of writing TOML.
//!
//! Four values are required before orchestration may begin: the access key,
//! the access secret, the artifact key and the target URL. A missing required
//! value is a startup-fatal configuration error returned as a structured
//! [`LaunchError::Config`] so the shell can render it to the user.
//!
//! # File format
//!
//! ```toml
//! access_key = "zxWZFA-..."
//! access_secret = "LPXuXT..."
//! artifact_key = "my-app-dist"
//! target_url = "http://127.0.0.1:8080"
//! update_policy = "onStart"   # onStart | never | daily
//! open_browser = false
//! allow_insecure_retry = true
//! app_dir = "/opt/my-app"     # defaults next to the data dir
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::core::{LaunchError, Result};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "LAUNCHPAD_CONFIG_PATH";

/// How often the remote upgrade API is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpdatePolicy {
    /// Check on every application start.
    #[default]
    #[serde(rename = "onStart")]
    OnStart,
    /// Never check; always run the currently staged version.
    #[serde(rename = "never")]
    Never,
    /// Check at most once per 24 hours, tracked via the version store.
    #[serde(rename = "daily")]
    Daily,
}

/// Settings the embedding shell supplies to the launcher core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Access key for the upgrade API (`X-AccessKey` header).
    #[serde(default)]
    pub access_key: String,
    /// Secret used to sign upgrade API requests. Never sent on the wire.
    #[serde(default)]
    pub access_secret: String,
    /// Key identifying the artifact on the upgrade service.
    #[serde(default)]
    pub artifact_key: String,
    /// Base URL the staged server is expected to serve on. Its port is the
    /// desired port for negotiation.
    #[serde(default)]
    pub target_url: String,
    /// Update-frequency policy.
    #[serde(default)]
    pub update_policy: UpdatePolicy,
    /// Whether the shell should open the final URL in a browser. Carried as
    /// configuration only; acting on it is the shell's concern.
    #[serde(default)]
    pub open_browser: bool,
    /// Retry a failed TLS download once with certificate validation disabled.
    ///
    /// This is a deliberate trust relaxation tolerating expired or
    /// misconfigured certificates on the artifact host. The retry is logged
    /// loudly; set to `false` to fail hard on certificate errors instead.
    #[serde(default = "default_allow_insecure_retry")]
    pub allow_insecure_retry: bool,
    /// Directory holding the artifact archive, the staged tree and the logs.
    #[serde(default)]
    pub app_dir: Option<PathBuf>,
    /// Base URL of the upgrade API.
    #[serde(default = "default_upgrade_api")]
    pub upgrade_api: String,
    /// Path of the server entry point relative to the staging directory.
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
    /// Program used to execute the entry point (e.g. `node`). When unset the
    /// entry point is executed directly.
    #[serde(default)]
    pub runtime: Option<String>,
}

fn default_allow_insecure_retry() -> bool {
    true
}

fn default_upgrade_api() -> String {
    "https://api.upgrade.toolsetlink.com".to_string()
}

fn default_entrypoint() -> String {
    "server/index.mjs".to_string()
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            access_secret: String::new(),
            artifact_key: String::new(),
            target_url: String::new(),
            update_policy: UpdatePolicy::default(),
            open_browser: false,
            allow_insecure_retry: default_allow_insecure_retry(),
            app_dir: None,
            upgrade_api: default_upgrade_api(),
            entrypoint: default_entrypoint(),
            runtime: None,
        }
    }
}

impl LauncherConfig {
    /// Load configuration from the default location, honoring
    /// [`CONFIG_PATH_ENV`]. A missing file yields defaults, which then pick
    /// up any environment overrides.
    pub async fn load() -> Result<Self> {
        let path = if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            PathBuf::from(path)
        } else {
            Self::default_path()?
        };
        Self::load_from(&path).await
    }

    /// Load configuration from a specific TOML file, then apply environment
    /// overrides.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            toml::from_str(&content).map_err(|e| LaunchError::Config {
                message: format!("invalid config file {}: {e}", path.display()),
            })?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Default config file location: `~/.launchpad/launchpad.toml`.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| LaunchError::Config {
            message: "could not determine home directory".to_string(),
        })?;
        Ok(home.join(".launchpad").join("launchpad.toml"))
    }

    fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 4] = [
            ("LAUNCHPAD_ACCESS_KEY", &mut self.access_key),
            ("LAUNCHPAD_ACCESS_SECRET", &mut self.access_secret),
            ("LAUNCHPAD_ARTIFACT_KEY", &mut self.artifact_key),
            ("LAUNCHPAD_TARGET_URL", &mut self.target_url),
        ];
        for (var, slot) in overrides {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    *slot = value;
                }
            }
        }
    }

    /// Check that every required setting is present and well-formed.
    ///
    /// Returns one error naming all missing values so the shell can show a
    /// single dialog instead of a drip of failures.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("access_key", &self.access_key),
            ("access_secret", &self.access_secret),
            ("artifact_key", &self.artifact_key),
            ("target_url", &self.target_url),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(LaunchError::Config {
                message: format!("missing required settings: {}", missing.join(", ")),
            });
        }

        Url::parse(&self.target_url).map_err(|e| LaunchError::Config {
            message: format!("invalid target_url {:?}: {e}", self.target_url),
        })?;
        Ok(())
    }

    /// Directory holding the artifact archive, staged tree and logs.
    pub fn app_dir(&self) -> PathBuf {
        self.app_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("launchpad")
        })
    }

    /// Path of the downloaded artifact archive (`<appDir>/dist.zip`).
    pub fn archive_path(&self) -> PathBuf {
        self.app_dir().join("dist.zip")
    }

    /// Directory the artifact is staged into (`<appDir>/dist`).
    pub fn staging_dir(&self) -> PathBuf {
        self.app_dir().join("dist")
    }

    /// Full path of the staged server entry point.
    pub fn entrypoint_path(&self) -> PathBuf {
        self.staging_dir().join(&self.entrypoint)
    }

    /// Path of the persisted version store.
    pub fn store_path(&self) -> PathBuf {
        self.app_dir().join("launchpad-state.json")
    }

    /// Directory holding the append-only server log.
    pub fn logs_dir(&self) -> PathBuf {
        self.app_dir().join("logs")
    }
}
