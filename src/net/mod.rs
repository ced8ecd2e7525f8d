//! Port negotiation and server readiness.
//!
//! The desired port is whatever the configured target URL carries. If it is
//! taken, [`find_free_port`] scans linearly upward and the first free port
//! wins; exhausting the range is a hard failure rather than a silent fallback
//! to a random port.
//!
//! [`ReadinessProbe`] polls the launched server until something answers.
//! HTTP 404 counts as ready: the bare root path may legitimately not be
//! routed, and the probe only cares that the server is alive.

use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};
use url::Url;

use crate::core::{LaunchError, Result};

/// Whether a TCP listener can currently bind `port` on the loopback
/// interface. The probe listener is closed immediately.
pub async fn is_port_free(port: u16) -> bool {
    match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => false,
        // Other bind failures (permissions, exotic stacks) are not "in use";
        // let the actual server spawn surface them.
        Err(_) => true,
    }
}

/// Linearly scan `start, start+1, ...` for the first free port.
pub async fn find_free_port(start: u16, max_attempts: u16) -> Result<u16> {
    for offset in 0..max_attempts {
        let port = start.saturating_add(offset);
        if is_port_free(port).await {
            debug!("port {port} is free");
            return Ok(port);
        }
    }
    Err(LaunchError::PortsExhausted {
        start,
        attempts: max_attempts,
    })
}

/// Extract the port of a URL, falling back to the scheme default.
pub fn port_from_url(url: &str) -> Result<u16> {
    let parsed = Url::parse(url).map_err(|e| LaunchError::Config {
        message: format!("invalid URL {url:?}: {e}"),
    })?;
    parsed
        .port_or_known_default()
        .ok_or_else(|| LaunchError::Config {
            message: format!("URL {url:?} has no port and no default for its scheme"),
        })
}

/// Rewrite the port of a URL, keeping everything else.
pub fn with_port(url: &str, port: u16) -> Result<String> {
    let mut parsed = Url::parse(url).map_err(|e| LaunchError::Config {
        message: format!("invalid URL {url:?}: {e}"),
    })?;
    parsed.set_port(Some(port)).map_err(|()| LaunchError::Config {
        message: format!("cannot set port on URL {url:?}"),
    })?;
    Ok(parsed.to_string())
}

/// Polls a launched server until it answers.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    /// Attempts before giving up.
    pub max_retries: u32,
    /// Per-attempt request timeout.
    pub attempt_timeout: Duration,
    /// Sleep between attempts.
    pub retry_delay: Duration,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self {
            max_retries: 30,
            attempt_timeout: Duration::from_secs(2),
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl ReadinessProbe {
    /// GET the root of `url` once per attempt until HTTP 200 or 404 answers.
    ///
    /// Any other status or transport error counts as a failed attempt. After
    /// `max_retries` consecutive failures the launch cycle is considered
    /// dead and [`LaunchError::ReadinessTimeout`] is returned.
    pub async fn wait_until_ready(&self, url: &str) -> Result<()> {
        let parsed = Url::parse(url).map_err(|e| LaunchError::Config {
            message: format!("invalid URL {url:?}: {e}"),
        })?;
        let root = format!(
            "{}://{}:{}/",
            parsed.scheme(),
            parsed.host_str().unwrap_or("127.0.0.1"),
            parsed.port_or_known_default().unwrap_or(80)
        );

        let client = reqwest::Client::builder()
            .timeout(self.attempt_timeout)
            .build()
            .map_err(|e| LaunchError::Network {
                operation: "readiness probe".to_string(),
                reason: e.to_string(),
            })?;

        for attempt in 1..=self.max_retries {
            match client.get(&root).send().await {
                Ok(response)
                    if response.status() == reqwest::StatusCode::OK
                        || response.status() == reqwest::StatusCode::NOT_FOUND =>
                {
                    info!("server answered after {attempt} attempt(s)");
                    return Ok(());
                }
                Ok(response) => {
                    debug!("attempt {attempt}: HTTP {}", response.status());
                }
                Err(e) => {
                    debug!("attempt {attempt}: {e}");
                }
            }
            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(LaunchError::ReadinessTimeout {
            url: url.to_string(),
            attempts: self.max_retries,
        })
    }
}
