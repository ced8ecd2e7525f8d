//! Child-process lifecycle for the staged server.
//!
//! [`ProcessSupervisor`] owns at most one OS process per application
//! instance. Starting a second process without stopping the first is an
//! error; stopping when nothing runs is a no-op, which makes [`stop`]
//! (`ProcessSupervisor::stop`) safe to call from every shutdown path,
//! normal exit and signal handlers alike, even more than once per shutdown.
//!
//! Captured stdout/stderr is re-emitted line by line through the injected
//! [`LogSink`] after lossy UTF-8 conversion. The conversion is a portability
//! guard against payloads that write non-UTF-8 bytes, not a functional
//! requirement.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::core::{LaunchError, Result};
use crate::events::LogSink;

/// How long a freshly spawned process must stay alive to count as started.
const SPAWN_GRACE: Duration = Duration::from_secs(2);

/// How long a stopped process gets to exit gracefully before the kill.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Supervises the single staged-server child process.
pub struct ProcessSupervisor {
    child: Option<Child>,
    log: Arc<dyn LogSink>,
}

impl ProcessSupervisor {
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        Self { child: None, log }
    }

    /// Whether a child process is currently owned.
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Spawn `executable` with `args` and the parent environment plus `env`.
    ///
    /// `cwd` should be the staged payload's directory so relative paths in
    /// the payload resolve against its own tree. Start is considered
    /// successful only if the process is still alive after a 2 second grace
    /// period; a process that already exited yields
    /// [`LaunchError::ProcessDiedDuringGrace`].
    pub async fn start(
        &mut self,
        executable: &Path,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&Path>,
    ) -> Result<()> {
        if self.child.is_some() {
            return Err(LaunchError::Spawn {
                reason: "a server process is already running".to_string(),
            });
        }

        let mut command = Command::new(executable);
        command
            .args(args)
            .envs(env)
            // UTF-8 hints for payloads that decide their output encoding
            // from the locale.
            .env("PYTHONIOENCODING", "utf-8")
            .env("LANG", "en_US.UTF-8")
            .env("LC_ALL", "en_US.UTF-8")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        info!("starting server process: {}", executable.display());
        let mut child = command.spawn().map_err(|e| LaunchError::Spawn {
            reason: format!("{}: {e}", executable.display()),
        })?;

        if let Some(stdout) = child.stdout.take() {
            spawn_output_forwarder(stdout, Arc::clone(&self.log));
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_forwarder(stderr, Arc::clone(&self.log));
        }

        tokio::time::sleep(SPAWN_GRACE).await;
        match child.try_wait() {
            Ok(Some(status)) => {
                warn!("server process exited during grace period: {status}");
                Err(LaunchError::ProcessDiedDuringGrace)
            }
            Err(e) => Err(LaunchError::Spawn {
                reason: format!("could not poll server process: {e}"),
            }),
            Ok(None) => {
                self.child = Some(child);
                info!("server process started");
                Ok(())
            }
        }
    }

    /// Stop the owned process, first gracefully, then by force.
    ///
    /// Idempotent: safe when no process was ever started and safe to call
    /// from multiple shutdown hooks in the same shutdown sequence.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            debug!("stop requested with no server process running");
            return;
        };

        terminate(&child);
        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(Ok(status)) => info!("server process exited: {status}"),
            Ok(Err(e)) => warn!("failed to reap server process: {e}"),
            Err(_) => {
                warn!("server process ignored terminate; killing");
                force_kill(&mut child).await;
            }
        }
    }
}

/// Ask the process to exit gracefully, platform-appropriately.
#[cfg(unix)]
fn terminate(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal send to a pid we own.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

/// On Windows there is no graceful signal for console-less children;
/// `taskkill /T` also takes down the process tree.
#[cfg(windows)]
fn terminate(child: &Child) {
    if let Some(pid) = child.id() {
        let _ = std::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

/// Forcefully kill the process and reap it.
async fn force_kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("failed to kill server process: {e}");
    }
}

fn spawn_output_forwarder<R>(stream: R, log: Arc<dyn LogSink>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']);
                    if !line.is_empty() {
                        log.log_line(line);
                    }
                }
                Err(e) => {
                    debug!("server output stream closed: {e}");
                    break;
                }
            }
        }
    });
}
