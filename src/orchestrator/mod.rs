//! End-to-end "ensure current artifact is staged and serving" workflow.
//!
//! [`Orchestrator`] is the only component with cross-cutting control flow.
//! Its pipeline runs strictly sequentially: each step depends on the output
//! of the previous one (the port depends on staged config, the process start
//! on the port, readiness on the start). There is no automatic retry of the
//! whole pipeline; a failed launch cycle is retried on the next application
//! start. The one external interruption is a shutdown request racing the
//! pipeline in [`Orchestrator::run_until_shutdown`], which stops any
//! already-spawned server process before returning.
//!
//! All collaborators are explicit fields injected at construction. The core
//! never reaches for globals or queries a GUI layer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{LauncherConfig, UpdatePolicy};
use crate::core::{LaunchError, Result};
use crate::events::LogSink;
use crate::fetch::ArtifactFetcher;
use crate::net::{self, ReadinessProbe};
use crate::process::ProcessSupervisor;
use crate::remote::{RemoteVersionClient, UpgradeCheck};
use crate::stage;
use crate::store::VersionStore;

const ONE_DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Scan bound for port negotiation.
const PORT_SCAN_ATTEMPTS: u16 = 100;

/// Composes the update-check, staging and launch pipeline.
pub struct Orchestrator {
    config: LauncherConfig,
    store: VersionStore,
    client: RemoteVersionClient,
    fetcher: ArtifactFetcher,
    supervisor: Arc<Mutex<ProcessSupervisor>>,
    probe: ReadinessProbe,
    log: Arc<dyn LogSink>,
}

impl Orchestrator {
    pub fn new(
        config: LauncherConfig,
        store: VersionStore,
        client: RemoteVersionClient,
        fetcher: ArtifactFetcher,
        supervisor: Arc<Mutex<ProcessSupervisor>>,
        probe: ReadinessProbe,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            config,
            store,
            client,
            fetcher,
            supervisor,
            probe,
            log,
        }
    }

    /// Run the full pipeline. On success the staged server is confirmed
    /// reachable and the returned URL is what the display surface should
    /// load. On failure the error describes the first failed step; the
    /// version store is left with `server_running == false`.
    pub async fn run(&mut self) -> Result<String> {
        self.store.set_server_running(false);
        self.store.save().await?;

        self.ensure_artifact().await?;

        let entrypoint = self.config.entrypoint_path();
        if !entrypoint.exists() {
            self.log.log_line(&format!(
                "error: server entry point missing: {}",
                entrypoint.display()
            ));
            return Err(LaunchError::EntrypointMissing {
                path: entrypoint.display().to_string(),
            });
        }

        // Negotiate the port before the child exists; the child learns it
        // through its environment.
        let desired = net::port_from_url(&self.config.target_url)?;
        self.log.log_line(&format!("checking whether port {desired} is available..."));
        let port = net::find_free_port(desired, PORT_SCAN_ATTEMPTS).await?;
        let final_url = if port == desired {
            self.log.log_line(&format!("port {desired} is available"));
            self.config.target_url.clone()
        } else {
            self.log.log_line(&format!(
                "port {desired} is taken, launching on port {port} instead"
            ));
            net::with_port(&self.config.target_url, port)?
        };

        self.start_server(port, &entrypoint).await?;

        self.log.log_line(&format!("waiting for the server at {final_url}..."));
        self.probe.wait_until_ready(&final_url).await?;
        self.log.log_line("server is ready");

        self.store.set_server_running(true);
        self.store.set_final_url(final_url.clone());
        self.store.save().await?;

        Ok(final_url)
    }

    /// Run the pipeline while honoring an external shutdown request.
    ///
    /// The pipeline is raced against `shutdown_signal`. A completed pipeline
    /// returns `Ok(Some(url))` and leaves the server running. A shutdown
    /// request, or a pipeline error after the spawn step, stops the
    /// supervised process before this returns, so a signal arriving
    /// mid-launch never orphans the child.
    pub async fn run_until_shutdown<F>(&mut self, shutdown_signal: F) -> Result<Option<String>>
    where
        F: Future<Output = ()>,
    {
        let outcome = {
            tokio::pin!(shutdown_signal);
            tokio::select! {
                result = self.run() => Some(result),
                _ = &mut shutdown_signal => None,
            }
        };
        match outcome {
            Some(Ok(final_url)) => Ok(Some(final_url)),
            Some(Err(e)) => {
                self.shutdown().await;
                Err(e)
            }
            None => {
                self.log.log_line("shutdown requested during startup");
                self.shutdown().await;
                Ok(None)
            }
        }
    }

    /// Make sure a current artifact is staged, downloading and wiping as the
    /// update policy dictates.
    async fn ensure_artifact(&mut self) -> Result<()> {
        let archive = self.config.archive_path();
        let entrypoint = self.config.entrypoint_path();
        let staging_dir = self.config.staging_dir();

        self.log.log_line(&format!(
            "current artifact version: {}",
            self.store.artifact_version()
        ));

        let mut wipe_staging = false;
        if !archive.exists() {
            self.log.log_line("no local artifact, downloading base archive...");
            let url = self.client.base_download_url(&self.config.artifact_key);
            self.fetcher.download(&url, &archive).await?;
        } else if self.should_check_update() {
            wipe_staging = self.check_and_fetch_update(&archive).await?;
        }

        if wipe_staging {
            self.log.log_line("cleaning staged tree before update...");
            stage::remove_recursive(&staging_dir).await?;
        }

        if wipe_staging || !entrypoint.exists() {
            self.log
                .log_line(&format!("extracting archive into {}...", staging_dir.display()));
            stage::stage(&archive, &staging_dir).await?;
        } else {
            self.log.log_line("staged tree is present, skipping extraction");
        }
        Ok(())
    }

    /// Whether the update policy allows a remote check right now.
    fn should_check_update(&self) -> bool {
        match self.config.update_policy {
            UpdatePolicy::OnStart => true,
            UpdatePolicy::Never => {
                self.log
                    .log_line("update policy is \"never\", skipping update check");
                false
            }
            UpdatePolicy::Daily => {
                let last = self.store.last_update_check_ms();
                let now = chrono::Utc::now().timestamp_millis();
                if last == 0 || now - last >= ONE_DAY_MS {
                    true
                } else {
                    let hours = (now - last) / (60 * 60 * 1000);
                    self.log.log_line(&format!(
                        "update policy is \"daily\" and the last check was {hours}h ago, skipping"
                    ));
                    false
                }
            }
        }
    }

    /// Consult the upgrade API; on a newer version fetch it and request a
    /// wipe of the staged tree. Check failures degrade to "keep the current
    /// version".
    async fn check_and_fetch_update(&mut self, archive: &std::path::Path) -> Result<bool> {
        self.log.log_line("checking for updates...");
        let current = self.store.artifact_version();
        let outcome = self.client.check(&self.config.artifact_key, current).await;

        if self.config.update_policy == UpdatePolicy::Daily {
            self.store
                .set_last_update_check_ms(chrono::Utc::now().timestamp_millis());
            self.store.save().await?;
        }

        match outcome {
            UpgradeCheck::UpdateAvailable {
                version,
                download_url,
                changelog,
            } => {
                self.log.log_line(&format!(
                    "new version available: {current} -> {version} ({changelog})"
                ));
                self.fetcher.download(&download_url, archive).await?;
                self.store.bump_artifact_version(version);
                self.store.save().await?;
                Ok(true)
            }
            UpgradeCheck::NoUpdate => {
                self.log
                    .log_line(&format!("already on the latest version: {current}"));
                Ok(false)
            }
            UpgradeCheck::CheckFailed => {
                warn!("update check failed, continuing with version {current}");
                self.log
                    .log_line("update check failed, continuing with the current version");
                Ok(false)
            }
        }
    }

    async fn start_server(&self, port: u16, entrypoint: &std::path::Path) -> Result<()> {
        let mut env = HashMap::new();
        env.insert("PORT".to_string(), port.to_string());

        let (program, args) = match &self.config.runtime {
            Some(runtime) => (
                std::path::PathBuf::from(runtime),
                vec![entrypoint.display().to_string()],
            ),
            None => (entrypoint.to_path_buf(), Vec::new()),
        };
        let cwd = entrypoint.parent().map(std::path::Path::to_path_buf);

        self.log
            .log_line(&format!("starting server: {} (PORT={port})", program.display()));
        let mut supervisor = self.supervisor.lock().await;
        supervisor.start(&program, &args, &env, cwd.as_deref()).await?;
        Ok(())
    }

    /// The version store, for callers that inspect state after a run.
    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Stop the supervised server process, if any.
    pub async fn shutdown(&self) {
        self.supervisor.lock().await.stop().await;
        // Give forwarded output a beat to drain before the process exits.
        tokio::time::sleep(Duration::from_millis(50)).await;
        info!("shutdown complete");
    }
}
