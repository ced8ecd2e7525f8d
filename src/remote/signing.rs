//! Request signing for the upgrade API.
//!
//! Every request carries a nonce, an RFC3339 timestamp with timezone offset
//! and a signature over `body=<json>&nonce=<n>&secretKey=<s>&timestamp=<t>&url=<path>`.
//! The digest is pluggable behind [`Signer`]; the deployed service expects
//! MD5, implemented by [`Md5Signer`].

use chrono::Local;

/// Computes the `X-Signature` header value for one request.
pub trait Signer: Send + Sync {
    /// Sign the canonical request string built from the given parts.
    fn sign(&self, body: &str, nonce: &str, secret_key: &str, timestamp: &str, uri: &str)
    -> String;
}

/// MD5-based signer matching the upgrade service's expected digest.
#[derive(Debug, Default, Clone, Copy)]
pub struct Md5Signer;

impl Signer for Md5Signer {
    fn sign(
        &self,
        body: &str,
        nonce: &str,
        secret_key: &str,
        timestamp: &str,
        uri: &str,
    ) -> String {
        let signing_string = signing_string(body, nonce, secret_key, timestamp, uri);
        format!("{:x}", md5::compute(signing_string.as_bytes()))
    }
}

/// Build the canonical signing string. An empty body is omitted entirely
/// rather than signed as `body=`.
pub(crate) fn signing_string(
    body: &str,
    nonce: &str,
    secret_key: &str,
    timestamp: &str,
    uri: &str,
) -> String {
    let mut parts = Vec::with_capacity(5);
    if !body.is_empty() {
        parts.push(format!("body={body}"));
    }
    parts.push(format!("nonce={nonce}"));
    parts.push(format!("secretKey={secret_key}"));
    parts.push(format!("timestamp={timestamp}"));
    parts.push(format!("url={uri}"));
    parts.join("&")
}

/// 16 lowercase hex characters from 8 random bytes.
pub fn generate_nonce() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

/// Local time as RFC3339 with a numeric timezone offset, e.g.
/// `2026-08-28T10:15:30+02:00`.
pub fn rfc3339_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}
