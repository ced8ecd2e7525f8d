//! Launchpad - update and process supervisor for a bundled web-server payload
//!
//! Launchpad sits between a desktop shell and the web server it embeds: on
//! each run it makes sure the bundled server artifact is present and current,
//! launches it as a child process on a free port, waits for it to answer and
//! hands a reachable URL back to the shell. The shell supplies configuration
//! (access keys, artifact key, target URL, update policy) and receives two
//! kinds of callbacks: human-readable log lines and structured
//! download-progress events.
//!
//! # Pipeline
//!
//! [`orchestrator::Orchestrator::run`] executes the steps in order:
//!
//! 1. Mark the server as not yet confirmed running ([`store`])
//! 2. Ensure a current artifact is staged ([`remote`], [`fetch`], [`stage`])
//! 3. Negotiate a free TCP port ([`net`])
//! 4. Launch the staged server with `PORT` injected ([`process`])
//! 5. Poll until the server answers ([`net::ReadinessProbe`])
//! 6. Persist the final URL and return it to the shell
//!
//! Pipeline steps run strictly sequentially; the only concurrent piece is
//! the [`logwatch::LogTailWatcher`], which streams the server's append-only
//! log file to a consumer independently of the pipeline.
//!
//! # Core Modules
//!
//! - [`config`] - shell-supplied settings and the filesystem layout
//! - [`core`] - the [`core::LaunchError`] taxonomy
//! - [`events`] - log/progress sinks the shell injects
//! - [`store`] - persisted artifact version and runtime facts
//! - [`remote`] - signed client for the upgrade API
//! - [`fetch`] - streaming artifact download with progress
//! - [`stage`] - archive extraction and staged-tree wipe
//! - [`net`] - port negotiation and the readiness probe
//! - [`process`] - child-process lifecycle
//! - [`logwatch`] - tailing watcher for the server log
//! - [`orchestrator`] - the end-to-end workflow

pub mod config;
pub mod core;
pub mod events;
pub mod fetch;
pub mod logwatch;
pub mod net;
pub mod orchestrator;
pub mod process;
pub mod remote;
pub mod stage;
pub mod store;
