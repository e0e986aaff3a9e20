//! Response model
//!
//! A [`Response`] is immutable once the wire layer returns it. Text and JSON
//! views are computed on first use and memoized.

use super::{Error, Headers, Result, Status, Version};
use bytes::Bytes;
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP response
#[derive(Debug, Clone)]
pub struct Response {
    version: Version,
    status: Status,
    reason: String,
    headers: Headers,
    body: Bytes,
    url: String,
    elapsed: Duration,
    pub(crate) history: Vec<Response>,
    text: OnceCell<String>,
    json: OnceCell<serde_json::Value>,
}

impl Response {
    /// Create a builder for constructing responses
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder::default()
    }

    /// Get the HTTP version the server answered with
    pub fn version(&self) -> Version {
        self.version
    }

    /// Get the status code
    pub fn status(&self) -> Status {
        self.status
    }

    /// Get the reason phrase
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Get the headers, duplicates included
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The URL this response was received from
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Time from writing the request to reading the last body byte
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Redirect responses that led here, in the order they were received
    pub fn history(&self) -> &[Response] {
        &self.history
    }

    /// Raw body bytes
    pub fn content(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, invalid sequences replaced
    pub fn text(&self) -> &str {
        self.text
            .get_or_init(|| String::from_utf8_lossy(&self.body).into_owned())
    }

    /// Body decoded as JSON
    pub fn json(&self) -> Result<&serde_json::Value> {
        self.json
            .get_or_try_init(|| serde_json::from_slice(&self.body).map_err(Error::from))
    }

    /// Body decoded into a caller-chosen type
    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Whether the status is below 400
    pub fn ok(&self) -> bool {
        !self.status.is_error()
    }

    /// Fail with [`Error::Http`] when the status is in the 400-599 range
    pub fn raise_for_status(&self) -> Result<()> {
        if self.status.is_error() {
            return Err(Error::Http {
                status: self.status.code(),
                response: Box::new(self.clone()),
            });
        }
        Ok(())
    }

    /// Consuming form of [`Response::raise_for_status`]
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_error() {
            return Err(Error::Http {
                status: self.status.code(),
                response: Box::new(self),
            });
        }
        Ok(self)
    }

    /// Iterate the body in slices of at most `chunk_size` bytes
    ///
    /// Slices share the body's buffer; nothing is copied.
    pub fn chunks(&self, chunk_size: usize) -> Chunks {
        Chunks {
            body: self.body.clone(),
            chunk_size: chunk_size.max(1),
        }
    }
}

/// Iterator over body slices, see [`Response::chunks`]
#[derive(Debug, Clone)]
pub struct Chunks {
    body: Bytes,
    chunk_size: usize,
}

impl Iterator for Chunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.body.is_empty() {
            return None;
        }
        let n = self.chunk_size.min(self.body.len());
        Some(self.body.split_to(n))
    }
}

/// Builder for HTTP responses
#[derive(Debug, Default)]
pub struct ResponseBuilder {
    version: Option<Version>,
    status: Option<Status>,
    reason: Option<String>,
    headers: Headers,
    body: Bytes,
    url: String,
    elapsed: Duration,
}

impl ResponseBuilder {
    /// Set the HTTP version
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Set the status code
    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the reason phrase
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replace all headers
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Build the response
    pub fn build(self) -> Response {
        let status = self.status.unwrap_or(Status::OK);
        let reason = self
            .reason
            .unwrap_or_else(|| status.reason_phrase().to_string());
        Response {
            version: self.version.unwrap_or_default(),
            status,
            reason,
            headers: self.headers,
            body: self.body,
            url: self.url,
            elapsed: self.elapsed,
            history: Vec::new(),
            text: OnceCell::new(),
            json: OnceCell::new(),
        }
    }
}
