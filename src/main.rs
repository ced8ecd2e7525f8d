//! Launchpad CLI entry point.
//!
//! Runs the update/launch pipeline headless: load and validate
//! configuration, ensure the artifact is staged and current, start the
//! server, print the final URL, then supervise until interrupted. Ctrl-C and
//! SIGTERM both stop the child process before exiting.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use launchpad::config::LauncherConfig;
use launchpad::events::TracingSink;
use launchpad::fetch::ArtifactFetcher;
use launchpad::net::ReadinessProbe;
use launchpad::orchestrator::Orchestrator;
use launchpad::process::ProcessSupervisor;
use launchpad::remote::RemoteVersionClient;
use launchpad::store::VersionStore;

#[derive(Parser)]
#[command(name = "launchpad", version, about = "Stage and supervise the bundled server payload")]
struct Cli {
    /// Config file path (defaults to ~/.launchpad/launchpad.toml)
    #[arg(long, env = "LAUNCHPAD_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Tracing filter, e.g. "info" or "launchpad=debug"
    #[arg(long, default_value = "info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => LauncherConfig::load_from(path).await?,
        None => LauncherConfig::load().await?,
    };
    config.validate()?;

    let sink = Arc::new(TracingSink);
    let store = VersionStore::load(&config.store_path()).await?;
    let client = RemoteVersionClient::new(
        config.upgrade_api.clone(),
        config.access_key.clone(),
        config.access_secret.clone(),
    );
    let fetcher = ArtifactFetcher::new(sink.clone(), config.allow_insecure_retry);
    let supervisor = Arc::new(Mutex::new(ProcessSupervisor::new(sink.clone())));

    let mut orchestrator = Orchestrator::new(
        config,
        store,
        client,
        fetcher,
        Arc::clone(&supervisor),
        ReadinessProbe::default(),
        sink,
    );

    // The signal future is armed before the pipeline starts so an interrupt
    // during download, staging or the readiness wait still stops the child
    // instead of orphaning it.
    let shutdown_signal = wait_for_shutdown_signal();
    tokio::pin!(shutdown_signal);

    let final_url = orchestrator
        .run_until_shutdown(shutdown_signal.as_mut())
        .await
        .context("initialization failed")?;
    let Some(final_url) = final_url else {
        // Interrupted during startup; the orchestrator already stopped
        // whatever was running.
        return Ok(());
    };
    println!("{final_url}");

    shutdown_signal.await;
    orchestrator.shutdown().await;
    Ok(())
}

/// Wait for Ctrl-C or, on Unix, SIGTERM. These are the process-level
/// shutdown hooks; the supervisor's idempotent stop makes it safe for more
/// than one of them to fire in the same shutdown.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!("could not install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
