//! Request model
//!
//! A [`Request`] is an immutable value built once through [`RequestBuilder`].
//! Redirects never mutate it; they derive a new request instead.

use super::{Error, Headers, Method, Result, Status, Version};
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Default ceiling on followed redirects
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// A re-invocable source of body chunks
///
/// Each call starts a fresh pass over the body, so the same request can be
/// written again after a redirect or fingerprinted for the cache.
pub type BodyProducer =
    Arc<dyn Fn() -> Box<dyn Iterator<Item = io::Result<Bytes>> + Send> + Send + Sync>;

/// Request body
#[derive(Clone, Default)]
pub enum Body {
    /// No body
    #[default]
    Empty,
    /// A body known up front, written in one piece
    Fixed(Bytes),
    /// A body produced chunk by chunk while writing
    Lazy(BodyProducer),
}

impl Body {
    /// Build a lazy body from a function returning a fresh chunk iterator
    pub fn lazy<F, I>(producer: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = io::Result<Bytes>>,
        I::IntoIter: Send + 'static,
    {
        Body::Lazy(Arc::new(move || Box::new(producer().into_iter())))
    }

    /// Serialize `value` as a JSON body
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Body::Fixed(Bytes::from(serde_json::to_vec(value)?)))
    }

    /// Whether there is no body at all
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Fixed(bytes) => bytes.is_empty(),
            Body::Lazy(_) => false,
        }
    }

    /// Byte length, when it is known without producing the body
    pub fn known_len(&self) -> Option<usize> {
        match self {
            Body::Empty => Some(0),
            Body::Fixed(bytes) => Some(bytes.len()),
            Body::Lazy(_) => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Fixed(bytes) => write!(f, "Fixed({} bytes)", bytes.len()),
            Body::Lazy(_) => f.write_str("Lazy"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Fixed(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Fixed(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Body::Fixed(Bytes::from_static(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Fixed(Bytes::from(text))
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Fixed(Bytes::copy_from_slice(text.as_bytes()))
    }
}

/// Timeout settings; `None` means unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Bound on TCP connect plus TLS handshake
    pub connect: Option<Duration>,
    /// Bound on each socket read
    pub read: Option<Duration>,
    /// Bound on each socket write
    pub write: Option<Duration>,
    /// Budget for the whole call, redirects included
    pub total: Option<Duration>,
}

impl TimeoutConfig {
    /// Only a total budget
    pub fn total(total: Duration) -> Self {
        TimeoutConfig {
            total: Some(total),
            ..Default::default()
        }
    }
}

/// Response caching policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CachePolicy {
    /// Never consult or populate the cache
    Never,
    /// Cache every final response regardless of status
    Always,
    /// Cache cacheable statuses (200, 203, 300, 301, 302, 307, 308)
    #[default]
    Default,
    /// Same storage rule as `Default`
    Aggressive,
}

impl CachePolicy {
    /// Whether a final response with `status` should be stored
    pub fn should_store(&self, status: Status) -> bool {
        match self {
            CachePolicy::Never => false,
            CachePolicy::Always => true,
            CachePolicy::Default | CachePolicy::Aggressive => {
                matches!(status.code(), 200 | 203 | 300 | 301 | 302 | 307 | 308)
            }
        }
    }
}

/// HTTP request
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: String,
    headers: Headers,
    params: BTreeMap<String, String>,
    cookies: BTreeMap<String, String>,
    body: Body,
    timeout: Option<TimeoutConfig>,
    allow_redirects: bool,
    max_redirects: usize,
    cache_policy: CachePolicy,
    version: Option<Version>,
    verify: Option<bool>,
}

impl Request {
    /// Create a builder for constructing requests
    pub fn builder(method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, url)
    }

    /// Get the request method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Get the target URL as given, or normalized once dispatched
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Query parameters not yet folded into the URL
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Cookies, sent as one `Cookie` header
    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// Get the body
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Timeout settings, if explicitly set
    pub fn timeout(&self) -> Option<&TimeoutConfig> {
        self.timeout.as_ref()
    }

    pub fn allow_redirects(&self) -> bool {
        self.allow_redirects
    }

    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    /// Requested protocol version, if explicitly set
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// TLS verification flag, if explicitly set
    pub fn verify(&self) -> Option<bool> {
        self.verify
    }

    /// The `Cookie` header value, if any cookies are set
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        Some(pairs.join("; "))
    }

    /// Fill unset fields from client defaults
    ///
    /// Explicit request values always win; default headers and cookies sit
    /// beneath the request's own.
    pub(crate) fn with_defaults(
        mut self,
        timeout: TimeoutConfig,
        verify: bool,
        version: Version,
        headers: &Headers,
        cookies: &BTreeMap<String, String>,
    ) -> Self {
        self.timeout.get_or_insert(timeout);
        self.verify.get_or_insert(verify);
        self.version.get_or_insert(version);

        let mut merged = headers.clone();
        merged.merge(&self.headers);
        self.headers = merged;

        for (name, value) in cookies {
            self.cookies
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    /// Replace the URL with its normalized form; params are folded into it
    pub(crate) fn with_normalized_url(mut self, url: String) -> Self {
        self.url = url;
        self.params.clear();
        self
    }

    /// Derive the request that follows a redirect to `location`
    ///
    /// A 303 switches to GET and drops the body along with its framing
    /// headers; every other redirect keeps method and body.
    pub(crate) fn redirected(&self, location: String, status: Status) -> Request {
        let mut next = self.clone();
        next.url = location;
        next.params.clear();

        if status.code() == 303 {
            next.method = Method::Get;
            next.body = Body::Empty;
            next.headers.remove("Content-Length");
            next.headers.remove("Content-Type");
            next.headers.remove("Transfer-Encoding");
        }
        next
    }
}

/// Builder for HTTP requests
#[derive(Debug)]
pub struct RequestBuilder {
    request: Request,
    error: Option<Error>,
}

impl RequestBuilder {
    fn new(method: Method, url: impl Into<String>) -> Self {
        RequestBuilder {
            request: Request {
                method,
                url: url.into(),
                headers: Headers::new(),
                params: BTreeMap::new(),
                cookies: BTreeMap::new(),
                body: Body::Empty,
                timeout: None,
                allow_redirects: true,
                max_redirects: DEFAULT_MAX_REDIRECTS,
                cache_policy: CachePolicy::default(),
                version: None,
                verify: None,
            },
            error: None,
        }
    }

    /// Set a header, replacing earlier values with the same name
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.set(name, value);
        self
    }

    /// Set several headers, last write wins per name
    pub fn headers(mut self, headers: &Headers) -> Self {
        self.request.headers.merge(headers);
        self
    }

    /// Add a query parameter, folded into the URL at dispatch
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.params.insert(name.into(), value.into());
        self
    }

    /// Add a cookie
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.cookies.insert(name.into(), value.into());
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.request.body = body.into();
        self
    }

    /// Set a JSON body and its content type
    ///
    /// A serialization failure is reported by [`RequestBuilder::try_build`].
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match Body::json(value) {
            Ok(body) => {
                self.request.body = body;
                self.request
                    .headers
                    .set("Content-Type", "application/json");
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Set every timeout at once
    pub fn timeout(mut self, timeout: TimeoutConfig) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    pub fn allow_redirects(mut self, allow: bool) -> Self {
        self.request.allow_redirects = allow;
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.request.max_redirects = max;
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.request.cache_policy = policy;
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.request.version = Some(version);
        self
    }

    /// Enable or disable TLS certificate and hostname verification
    pub fn verify(mut self, verify: bool) -> Self {
        self.request.verify = Some(verify);
        self
    }

    /// Build the request, surfacing any deferred builder error
    pub fn try_build(self) -> Result<Request> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.request),
        }
    }

    /// Build the request
    ///
    /// A failed [`RequestBuilder::json`] leaves the body empty; use
    /// [`RequestBuilder::try_build`] to observe that failure.
    pub fn build(self) -> Request {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = Request::builder(Method::Post, "http://example.com/test")
            .header("Content-Type", "text/plain")
            .header("content-type", "text/html")
            .cookie("b", "2")
            .cookie("a", "1")
            .body("Hello")
            .build();

        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.headers().get_all("Content-Type"), vec!["text/html"]);
        assert_eq!(req.cookie_header().as_deref(), Some("a=1; b=2"));
        assert_eq!(req.body().known_len(), Some(5));
        assert_eq!(req.max_redirects(), DEFAULT_MAX_REDIRECTS);
        assert!(req.timeout().is_none());
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let req = Request::builder(Method::Post, "http://example.com/")
            .json(&serde_json::json!({"k": 1}))
            .try_build()
            .unwrap();

        assert_eq!(req.headers().get("Content-Type"), Some("application/json"));
        match req.body() {
            Body::Fixed(bytes) => assert_eq!(&bytes[..], br#"{"k":1}"#),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_lazy_body_is_replayable() {
        let body = Body::lazy(|| vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"c"))]);
        let Body::Lazy(producer) = &body else {
            panic!("expected lazy body");
        };

        for _ in 0..2 {
            let collected: Vec<u8> = producer()
                .flat_map(|chunk| chunk.unwrap().to_vec())
                .collect();
            assert_eq!(collected, b"abc");
        }
        assert_eq!(body.known_len(), None);
    }

    #[test]
    fn test_defaults_do_not_override_explicit_values() {
        let mut defaults = Headers::new();
        defaults.insert("User-Agent", "snapwire");
        defaults.insert("Accept", "*/*");
        let mut default_cookies = BTreeMap::new();
        default_cookies.insert("session".to_string(), "default".to_string());

        let req = Request::builder(Method::Get, "http://example.com/")
            .header("Accept", "text/plain")
            .cookie("session", "mine")
            .verify(false)
            .build()
            .with_defaults(
                TimeoutConfig::total(Duration::from_secs(3)),
                true,
                Version::Http11,
                &defaults,
                &default_cookies,
            );

        assert_eq!(req.headers().get("Accept"), Some("text/plain"));
        assert_eq!(req.headers().get("User-Agent"), Some("snapwire"));
        assert_eq!(req.cookies().get("session").map(String::as_str), Some("mine"));
        assert_eq!(req.verify(), Some(false));
        assert_eq!(req.timeout().and_then(|t| t.total), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_see_other_downgrades_to_get() {
        let req = Request::builder(Method::Post, "http://example.com/form")
            .header("Content-Type", "text/plain")
            .body("payload")
            .build();

        let next = req.redirected("http://example.com/done".into(), Status::new(303).unwrap());
        assert_eq!(next.method(), Method::Get);
        assert!(next.body().is_empty());
        assert!(!next.headers().contains("Content-Type"));

        let kept = req.redirected("http://example.com/moved".into(), Status::new(307).unwrap());
        assert_eq!(kept.method(), Method::Post);
        assert_eq!(kept.body().known_len(), Some(7));
    }

    #[test]
    fn test_cache_policy_storage_rules() {
        let ok = Status::OK;
        let not_found = Status::NOT_FOUND;

        assert!(CachePolicy::Default.should_store(ok));
        assert!(!CachePolicy::Default.should_store(not_found));
        assert!(CachePolicy::Always.should_store(not_found));
        assert!(!CachePolicy::Never.should_store(ok));
    }
}
