//! Outbound events to the embedding shell.
//!
//! The launcher never talks to a GUI layer directly. Instead the embedding
//! shell injects two sinks at construction time:
//!
//! - [`LogSink`] receives human-readable log lines for a log view
//! - [`ProgressSink`] receives structured [`DownloadProgress`] updates
//!
//! Shells whose consumer comes up asynchronously (a renderer process, a
//! webview) wrap their sinks in a [`BufferedSink`]: events emitted before
//! [`BufferedSink::mark_ready`] are held in order and flushed once the
//! consumer signals readiness. No event is dropped because the consumer was
//! not yet listening.

use serde::Serialize;
use std::sync::Mutex;
use std::sync::mpsc::Sender;

/// Transient state of an in-flight artifact transfer.
///
/// Created at transfer start (`visible: true, percent: 0, active: true`),
/// updated per received chunk while the total size is known, finalized at
/// `percent: 100, active: false` on completion and cleared
/// (`visible: false`) shortly after. On failure it collapses immediately to
/// `{ visible: false, active: false }`. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadProgress {
    /// Whether the shell should show a progress surface at all
    pub visible: bool,
    /// Completion percentage, clamped to `0..=100`
    pub percent: u8,
    /// Whether bytes are still being transferred
    pub active: bool,
}

impl DownloadProgress {
    /// Progress payload for a transfer that just started.
    pub fn started() -> Self {
        Self {
            visible: true,
            percent: 0,
            active: true,
        }
    }

    /// Progress payload for a completed transfer, before it is cleared.
    pub fn finished() -> Self {
        Self {
            visible: true,
            percent: 100,
            active: false,
        }
    }

    /// Progress payload hiding the surface after completion or failure.
    pub fn cleared(percent: u8) -> Self {
        Self {
            visible: false,
            percent,
            active: false,
        }
    }
}

/// Receiver of human-readable log lines.
pub trait LogSink: Send + Sync {
    /// Deliver one log line to the consumer.
    fn log_line(&self, line: &str);
}

/// Receiver of structured download-progress updates.
pub trait ProgressSink: Send + Sync {
    /// Deliver one progress update to the consumer.
    fn progress(&self, update: DownloadProgress);
}

/// Sink that forwards everything to `tracing`.
///
/// Used by the CLI binary, where there is no separate log view.
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log_line(&self, line: &str) {
        tracing::info!(target: "launchpad::shell", "{line}");
    }
}

impl ProgressSink for TracingSink {
    fn progress(&self, update: DownloadProgress) {
        tracing::debug!(target: "launchpad::shell", percent = update.percent, active = update.active, "download progress");
    }
}

/// Event carried by a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    /// A log line destined for the log view
    Log(String),
    /// A download-progress update
    Progress(DownloadProgress),
}

/// Sink that forwards events over an mpsc channel.
///
/// Send failures are ignored: a consumer that went away must not fail the
/// pipeline.
pub struct ChannelSink {
    tx: Sender<ShellEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<ShellEvent>) -> Self {
        Self { tx }
    }
}

impl LogSink for ChannelSink {
    fn log_line(&self, line: &str) {
        let _ = self.tx.send(ShellEvent::Log(line.to_string()));
    }
}

impl ProgressSink for ChannelSink {
    fn progress(&self, update: DownloadProgress) {
        let _ = self.tx.send(ShellEvent::Progress(update));
    }
}

/// Buffering decorator around a pair of downstream sinks.
///
/// Until [`mark_ready`](Self::mark_ready) is called, log lines and progress
/// updates are queued FIFO instead of forwarded. `mark_ready` flushes both
/// queues in emission order and switches to pass-through.
pub struct BufferedSink<L: LogSink, P: ProgressSink> {
    log: L,
    progress: P,
    state: Mutex<BufferState>,
}

#[derive(Default)]
struct BufferState {
    ready: bool,
    pending_logs: Vec<String>,
    pending_progress: Vec<DownloadProgress>,
}

impl<L: LogSink, P: ProgressSink> BufferedSink<L, P> {
    pub fn new(log: L, progress: P) -> Self {
        Self {
            log,
            progress,
            state: Mutex::new(BufferState::default()),
        }
    }

    /// Signal that the consumer is listening; flush everything buffered.
    pub fn mark_ready(&self) {
        let (logs, updates) = {
            let mut state = self.state.lock().expect("sink state poisoned");
            state.ready = true;
            (
                std::mem::take(&mut state.pending_logs),
                std::mem::take(&mut state.pending_progress),
            )
        };
        for line in logs {
            self.log.log_line(&line);
        }
        for update in updates {
            self.progress.progress(update);
        }
    }
}

impl<L: LogSink, P: ProgressSink> LogSink for BufferedSink<L, P> {
    fn log_line(&self, line: &str) {
        let mut state = self.state.lock().expect("sink state poisoned");
        if state.ready {
            drop(state);
            self.log.log_line(line);
        } else {
            state.pending_logs.push(line.to_string());
        }
    }
}

impl<L: LogSink, P: ProgressSink> ProgressSink for BufferedSink<L, P> {
    fn progress(&self, update: DownloadProgress) {
        let mut state = self.state.lock().expect("sink state poisoned");
        if state.ready {
            drop(state);
            self.progress.progress(update);
        } else {
            state.pending_progress.push(update);
        }
    }
}
