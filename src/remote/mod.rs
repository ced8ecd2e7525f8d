//! Client for the remote upgrade API.
//!
//! The upgrade service answers two endpoints: `POST /v1/file/upgrade` for
//! version metadata and `GET /v1/file/download` for the raw artifact. Every
//! POST is signed; see [`signing`] for the scheme.
//!
//! A failed check is not an error to the caller: any transport or parse
//! failure maps to [`UpgradeCheck::CheckFailed`], which the orchestrator
//! treats as "assume the current version is fine".

pub mod signing;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use signing::{Md5Signer, Signer, generate_nonce, rfc3339_timestamp};

const UPGRADE_URI: &str = "/v1/file/upgrade";
const DOWNLOAD_URI: &str = "/v1/file/download";

// Platform identifiers the upgrade service expects in every request body.
const DEV_KEY: &str = "13";
const DEV_MODEL_KEY: &str = "24";

/// Outcome of one upgrade check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeCheck {
    /// The staged version is current.
    NoUpdate,
    /// A newer artifact is available for download.
    UpdateAvailable {
        /// Version code of the newer artifact
        version: u64,
        /// URL the artifact can be fetched from
        download_url: String,
        /// Human-readable changelog supplied by the service
        changelog: String,
    },
    /// The check could not be completed; proceed with the current version.
    CheckFailed,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpgradeRequest<'a> {
    file_key: &'a str,
    version_code: u64,
    dev_key: &'a str,
    dev_model_key: &'a str,
}

#[derive(Deserialize)]
struct UpgradeResponse {
    code: i64,
    #[serde(default)]
    #[allow(dead_code)]
    msg: String,
    #[serde(default)]
    data: Option<UpgradeData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpgradeData {
    version_code: u64,
    #[serde(default)]
    url_path: String,
    #[serde(default)]
    prompt_upgrade_content: String,
}

/// Signed client for the upgrade API.
pub struct RemoteVersionClient {
    base_url: String,
    access_key: String,
    access_secret: String,
    client: reqwest::Client,
    signer: Box<dyn Signer>,
}

impl RemoteVersionClient {
    /// Create a client against `base_url` with the default MD5 signer.
    pub fn new(
        base_url: impl Into<String>,
        access_key: impl Into<String>,
        access_secret: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_key: access_key.into(),
            access_secret: access_secret.into(),
            client,
            signer: Box::new(Md5Signer),
        }
    }

    /// Replace the signature digest. The digest must match what the remote
    /// service verifies against.
    pub fn with_signer(mut self, signer: Box<dyn Signer>) -> Self {
        self.signer = signer;
        self
    }

    /// Ask the service whether a newer artifact than `current_version` exists.
    ///
    /// Application code 200 with a greater `versionCode` signals an update;
    /// code 0 or an equal/lower version signals none. Anything else
    /// (transport errors, unexpected statuses, malformed bodies) degrades to
    /// [`UpgradeCheck::CheckFailed`].
    pub async fn check(&self, artifact_key: &str, current_version: u64) -> UpgradeCheck {
        let request = UpgradeRequest {
            file_key: artifact_key,
            version_code: current_version,
            dev_key: DEV_KEY,
            dev_model_key: DEV_MODEL_KEY,
        };
        let body = match serde_json::to_string(&request) {
            Ok(body) => body,
            Err(e) => {
                warn!("failed to serialize upgrade request: {e}");
                return UpgradeCheck::CheckFailed;
            }
        };

        let nonce = generate_nonce();
        let timestamp = rfc3339_timestamp();
        let signature = self
            .signer
            .sign(&body, &nonce, &self.access_secret, &timestamp, UPGRADE_URI);

        let response = self
            .client
            .post(format!("{}{UPGRADE_URI}", self.base_url))
            .header("X-Timestamp", &timestamp)
            .header("X-Nonce", &nonce)
            .header("X-Signature", &signature)
            .header("X-AccessKey", &self.access_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("upgrade check request failed: {e}");
                return UpgradeCheck::CheckFailed;
            }
        };

        if !response.status().is_success() {
            warn!("upgrade check answered HTTP {}", response.status());
            return UpgradeCheck::CheckFailed;
        }

        let parsed: UpgradeResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("upgrade check response did not parse: {e}");
                return UpgradeCheck::CheckFailed;
            }
        };

        match (parsed.code, parsed.data) {
            (200, Some(data)) if data.version_code > current_version => {
                debug!(
                    "update available: {current_version} -> {}",
                    data.version_code
                );
                UpgradeCheck::UpdateAvailable {
                    version: data.version_code,
                    download_url: data.url_path,
                    changelog: data.prompt_upgrade_content,
                }
            }
            (200, _) => UpgradeCheck::NoUpdate,
            (0, _) => UpgradeCheck::NoUpdate,
            (code, _) => {
                warn!("upgrade check answered application code {code}");
                UpgradeCheck::CheckFailed
            }
        }
    }

    /// URL for fetching the base artifact directly, used on first run when no
    /// archive exists locally.
    pub fn base_download_url(&self, artifact_key: &str) -> String {
        format!("{}{DOWNLOAD_URI}?fileKey={artifact_key}", self.base_url)
    }
}
