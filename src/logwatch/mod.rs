//! Tailing watcher for the append-only server log.
//!
//! A [`LogTailWatcher`] moves through four states: idle, initialized (the
//! last lines of the file were emitted as one [`LogEvent::Ready`] batch),
//! watching (incremental [`LogEvent::Lines`] batches as the file grows) and
//! closed. Rotation is detected by the file shrinking below the recorded
//! read offset; that heuristic cannot distinguish truncated-in-place from
//! replaced-with-shorter-file, which is an accepted approximation.
//!
//! Read errors while watching are reported as [`LogEvent::Error`] and do not
//! stop the watcher. Events are delivered FIFO per watcher instance over a
//! tokio channel. Callers own the one-watcher-per-log invariant: a new watch
//! on the same path must be preceded by [`LogTailWatcher::cleanup`] of the
//! previous instance.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::Result;

/// How many trailing lines the initial batch carries.
pub const TAIL_LINES: usize = 50;

/// Size of the window read from the end of the file for the initial batch.
/// A tunable that assumes log lines are short; 32 KiB comfortably covers 50
/// of them.
pub const TAIL_WINDOW_BYTES: u64 = 32 * 1024;

/// Event stream of one watcher instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// Initial batch: the last [`TAIL_LINES`] non-empty lines of the file.
    Ready(Vec<String>),
    /// Incremental batch of appended lines, or the re-read tail after a
    /// rotation.
    Lines(Vec<String>),
    /// A read failed; the watcher keeps running.
    Error(String),
}

/// Offset-tracking tail reader. Split out from the watcher so the growth and
/// rotation logic is driveable without filesystem notifications.
#[derive(Debug)]
pub(crate) struct TailState {
    path: PathBuf,
    offset: u64,
}

impl TailState {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, offset: 0 }
    }

    /// Read up to [`TAIL_LINES`] non-empty lines from the end of the file and
    /// record the current size as the read offset.
    pub(crate) async fn initial_batch(&mut self) -> std::io::Result<Vec<String>> {
        let lines = self.read_tail_lines().await?;
        self.offset = fs::metadata(&self.path).await?.len();
        Ok(lines)
    }

    /// React to a change notification. Returns the batch to emit, if any.
    pub(crate) async fn handle_change(&mut self) -> std::io::Result<Option<Vec<String>>> {
        let new_size = fs::metadata(&self.path).await?.len();

        if new_size < self.offset {
            // Rotated or truncated: start over from the trailing window.
            debug!(
                "log file shrank ({} -> {new_size}); treating as rotation",
                self.offset
            );
            self.offset = 0;
            let lines = self.read_tail_lines().await?;
            self.offset = new_size;
            return Ok(Some(lines));
        }

        if new_size == self.offset {
            return Ok(None);
        }

        let mut file = fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = vec![0u8; (new_size - self.offset) as usize];
        file.read_exact(&mut buf).await?;
        self.offset = new_size;

        let lines = split_lines(&buf);
        Ok(if lines.is_empty() { None } else { Some(lines) })
    }

    async fn read_tail_lines(&self) -> std::io::Result<Vec<String>> {
        let size = fs::metadata(&self.path).await?.len();
        let start = size.saturating_sub(TAIL_WINDOW_BYTES);

        let mut file = fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; (size - start) as usize];
        file.read_exact(&mut buf).await?;

        let mut lines = split_lines(&buf);
        if lines.len() > TAIL_LINES {
            lines.drain(..lines.len() - TAIL_LINES);
        }
        Ok(lines)
    }
}

fn split_lines(buf: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(buf)
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Watches one append-only log file and streams line batches to a consumer.
pub struct LogTailWatcher {
    path: PathBuf,
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
}

impl LogTailWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            watcher: None,
            task: None,
        }
    }

    /// Emit the initial tail batch and begin observing file changes.
    ///
    /// Returns the receiver the consumer reads [`LogEvent`]s from. The first
    /// event is always [`LogEvent::Ready`].
    pub async fn init_watch(&mut self) -> Result<mpsc::UnboundedReceiver<LogEvent>> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut state = TailState::new(self.path.clone());
        let first = state.initial_batch().await?;
        let _ = event_tx.send(LogEvent::Ready(first));

        // Bridge notify's callback thread into the async task.
        let (change_tx, mut change_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            match event {
                Ok(event)
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) =>
                {
                    let _ = change_tx.send(());
                }
                Ok(_) => {}
                Err(e) => warn!("log watch notification error: {e}"),
            }
        })
        .map_err(|e| crate::core::LaunchError::Io(std::io::Error::other(e)))?;
        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(|e| crate::core::LaunchError::Io(std::io::Error::other(e)))?;
        self.watcher = Some(watcher);

        self.task = Some(tokio::spawn(async move {
            while change_rx.recv().await.is_some() {
                match state.handle_change().await {
                    Ok(Some(lines)) => {
                        if event_tx.send(LogEvent::Lines(lines)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let message = format!("failed to read appended log data: {e}");
                        if event_tx.send(LogEvent::Error(message)).is_err() {
                            break;
                        }
                    }
                }
            }
        }));

        Ok(event_rx)
    }

    /// Stop observing and release all resources.
    ///
    /// Idempotent and safe to call when [`init_watch`](Self::init_watch) was
    /// never called. The event channel closes once the internal task winds
    /// down.
    pub fn cleanup(&mut self) {
        self.watcher = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        debug!("log watcher for {} cleaned up", self.path.display());
    }

    /// Path being watched.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LogTailWatcher {
    fn drop(&mut self) {
        self.cleanup();
    }
}
