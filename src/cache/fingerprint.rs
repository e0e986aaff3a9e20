//! Request fingerprints
//!
//! A fingerprint is the SHA-256 of a canonical JSON array:
//! `[method, normalized_url, headers, cookies, body_digest]`. Header names
//! are lower-cased, header and cookie pairs are sorted, and the body digest
//! is `null` when there is no body. Query parameters take part through the
//! normalized URL, whose query is already sorted.

use crate::http::request::BodyProducer;
use crate::http::{target, Body, Error, Request, Result};
use openssl::sha::{sha256, Sha256};
use serde_json::json;
use std::fmt;

/// Hex-encoded SHA-256 cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a request
    ///
    /// Fails only when a lazy body's producer fails while being drained.
    pub fn of(request: &Request) -> Result<Self> {
        let url = target::normalize(request.url(), request.params())?;

        let mut headers: Vec<(String, &str)> = request
            .headers()
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        headers.sort();

        // BTreeMap iteration is already ordered by name.
        let cookies: Vec<(&str, &str)> = request
            .cookies()
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();

        let body = match request.body() {
            Body::Empty => None,
            Body::Fixed(bytes) if bytes.is_empty() => None,
            Body::Fixed(bytes) => Some(hex(&sha256(bytes))),
            Body::Lazy(producer) => Some(drain_digest(producer)?),
        };

        let canonical = json!([request.method().as_str(), url.as_str(), headers, cookies, body]);
        Ok(Fingerprint(hex(&sha256(canonical.to_string().as_bytes()))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn drain_digest(producer: &BodyProducer) -> Result<String> {
    let mut hasher = Sha256::new();
    for chunk in producer() {
        let chunk = chunk.map_err(|e| Error::Body(e.to_string()))?;
        hasher.update(&chunk);
    }
    Ok(hex(&hasher.finish()))
}

fn hex(digest: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
