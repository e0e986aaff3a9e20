//! Request orchestrator
//!
//! [`Client`] ties the pieces together. For each call it applies the client
//! defaults, normalizes the URL, consults the cache, borrows a connection
//! from the pool, runs the exchange on the wire and follows redirects.
//!
//! A `Client` is `Send + Sync`; share it between threads behind an `Arc` or
//! by reference from scoped threads.
//!
//! # Example
//!
//! ```no_run
//! use snapwire::{Client, Method, Request};
//!
//! let client = Client::new();
//! let request = Request::builder(Method::Get, "http://example.com/items")
//!     .param("page", "2")
//!     .build();
//! let response = client.execute(request)?.error_for_status()?;
//! println!("{}", response.text());
//! # Ok::<(), snapwire::Error>(())
//! ```

use crate::cache::{CacheStats, Fingerprint, ResponseCache};
use crate::config::ClientConfig;
use crate::http::wire::send_and_receive;
use crate::http::{
    target, Body, CachePolicy, Error, Headers, Method, Request, Response, Result, Target,
};
use crate::pool::{ConnectionPool, PoolKey, PoolStats};
use arc_swap::ArcSwap;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Headers and cookies merged beneath every request
#[derive(Debug, Clone, Default)]
struct Defaults {
    headers: Headers,
    cookies: BTreeMap<String, String>,
}

/// Blocking HTTP/1.1 client with pooling, caching and redirects
pub struct Client {
    config: ClientConfig,
    pool: ConnectionPool,
    cache: ResponseCache,
    defaults: ArcSwap<Defaults>,
}

impl Client {
    /// Create a client with the default configuration
    pub fn new() -> Self {
        Self::build(ClientConfig::default())
    }

    /// Create a client from a validated configuration
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ClientConfig) -> Self {
        let pool = ConnectionPool::new(config.pool.clone(), config.tls.clone());
        let cache = ResponseCache::new(config.cache_ttl, config.cache_max_entries);
        let defaults = ArcSwap::from_pointee(Defaults {
            headers: config.headers.clone(),
            cookies: config.cookies.clone(),
        });
        Client {
            config,
            pool,
            cache,
            defaults,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a request and return the final response
    ///
    /// Redirects are followed when the request allows it; every response on
    /// the way is available through [`Response::history`]. The total
    /// timeout, if any, covers the whole chain.
    pub fn execute(&self, request: Request) -> Result<Response> {
        let request = self.prepare(request)?;
        let deadline = request
            .timeout()
            .and_then(|t| t.total)
            .map(|total| Instant::now() + total);
        self.dispatch(request, deadline, 0)
    }

    pub fn get(&self, url: &str) -> Result<Response> {
        self.execute(Request::builder(Method::Get, url).build())
    }

    pub fn head(&self, url: &str) -> Result<Response> {
        self.execute(Request::builder(Method::Head, url).build())
    }

    pub fn delete(&self, url: &str) -> Result<Response> {
        self.execute(Request::builder(Method::Delete, url).build())
    }

    pub fn options(&self, url: &str) -> Result<Response> {
        self.execute(Request::builder(Method::Options, url).build())
    }

    pub fn post(&self, url: &str, body: impl Into<Body>) -> Result<Response> {
        self.execute(Request::builder(Method::Post, url).body(body).build())
    }

    pub fn put(&self, url: &str, body: impl Into<Body>) -> Result<Response> {
        self.execute(Request::builder(Method::Put, url).body(body).build())
    }

    pub fn patch(&self, url: &str, body: impl Into<Body>) -> Result<Response> {
        self.execute(Request::builder(Method::Patch, url).body(body).build())
    }

    /// Send a request and iterate its body in slices of `chunk_size` bytes
    ///
    /// `on_progress` is called once per slice with the slice length and the
    /// announced `Content-Length` (0 when the response carries none).
    pub fn stream<F>(
        &self,
        request: Request,
        chunk_size: usize,
        on_progress: F,
    ) -> Result<BodyStream<F>>
    where
        F: FnMut(usize, usize),
    {
        let response = self.execute(request)?;
        let total = response
            .headers()
            .get("Content-Length")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        Ok(BodyStream {
            chunks: response.chunks(chunk_size),
            total,
            on_progress,
        })
    }

    /// Add or replace a default header for requests issued from now on
    pub fn set_default_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        self.defaults.rcu(|current| {
            let mut next = Defaults::clone(current);
            next.headers.set(name.clone(), value.clone());
            next
        });
    }

    /// Add or replace a default cookie for requests issued from now on
    pub fn set_default_cookie(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        self.defaults.rcu(|current| {
            let mut next = Defaults::clone(current);
            next.cookies.insert(name.clone(), value.clone());
            next
        });
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached response
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Close every idle connection
    ///
    /// The client stays usable; later requests open fresh connections.
    pub fn close(&self) {
        self.pool.close_all();
    }

    /// Apply client defaults and fold params into a normalized URL
    fn prepare(&self, request: Request) -> Result<Request> {
        let defaults = self.defaults.load();
        let request = request.with_defaults(
            self.config.timeout,
            self.config.verify,
            self.config.version,
            &defaults.headers,
            &defaults.cookies,
        );

        let raw = self.join_base(request.url());
        let url = target::normalize(&raw, request.params())?;
        Ok(request.with_normalized_url(url.to_string()))
    }

    fn join_base(&self, url: &str) -> String {
        match &self.config.base_url {
            Some(base) if !url.starts_with("http://") && !url.starts_with("https://") => {
                format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/'))
            }
            _ => url.to_string(),
        }
    }

    /// One hop of the redirect chain
    fn dispatch(
        &self,
        request: Request,
        deadline: Option<Instant>,
        hops: usize,
    ) -> Result<Response> {
        let policy = request.cache_policy();
        let fingerprint = match policy {
            CachePolicy::Never => None,
            _ => match Fingerprint::of(&request) {
                Ok(fingerprint) => Some(fingerprint),
                Err(e) => {
                    warn!(
                        url = request.url(),
                        error = %e,
                        "cannot fingerprint request, cache bypassed"
                    );
                    None
                }
            },
        };

        if let Some(fingerprint) = &fingerprint {
            if let Some(cached) = self.cache.lookup_fingerprint(fingerprint) {
                debug!(method = %request.method(), url = request.url(), "served from cache");
                return Ok(cached);
            }
        }

        let target = Target::parse(request.url())?;
        let response = self.exchange(&request, &target, deadline)?;

        let response = match self.follow(&request, &target, &response, hops)? {
            Some(next) => {
                let mut last = self.dispatch(next, deadline, hops + 1)?;
                let mut history = Vec::with_capacity(last.history.len() + 1);
                history.push(response);
                history.append(&mut last.history);
                last.history = history;
                last
            }
            None => response,
        };

        if let Some(fingerprint) = fingerprint {
            if policy.should_store(response.status()) {
                trace!(%fingerprint, status = %response.status(), "caching response");
                self.cache.store_fingerprint(fingerprint, response.clone());
            }
        }

        Ok(response)
    }

    /// Run one request/response exchange on a pooled connection
    fn exchange(
        &self,
        request: &Request,
        target: &Target,
        deadline: Option<Instant>,
    ) -> Result<Response> {
        let timeout = request.timeout().copied().unwrap_or(self.config.timeout);
        let version = request.version().unwrap_or(self.config.version);
        let verify = request.verify().unwrap_or(self.config.verify);

        let connect_timeout = cap(timeout.connect, remaining(deadline)?);
        let key = PoolKey::for_target(target, version, verify);
        let mut lease = self.pool.acquire(&key, connect_timeout)?;

        let session = lease.session_mut();
        session.set_deadline(deadline);
        let result = session
            .set_timeouts(timeout.read, timeout.write)
            .and_then(|()| send_and_receive(session, request, target));

        match result {
            Ok(response) => {
                debug!(
                    method = %request.method(),
                    url = request.url(),
                    status = %response.status(),
                    elapsed = ?response.elapsed(),
                    "exchange complete"
                );
                Ok(response)
            }
            Err(e) => {
                if e.poisons_connection() {
                    warn!(
                        host = target.host(),
                        port = target.port(),
                        error = %e,
                        "discarding connection after failed exchange"
                    );
                    lease.discard();
                }
                Err(e)
            }
        }
    }

    /// The request to send next, if `response` is a redirect to follow
    fn follow(
        &self,
        request: &Request,
        target: &Target,
        response: &Response,
        hops: usize,
    ) -> Result<Option<Request>> {
        if !request.allow_redirects() || !response.status().is_redirect() {
            return Ok(None);
        }
        let Some(location) = response.headers().get("Location") else {
            debug!(status = %response.status(), "redirect without Location, returned as-is");
            return Ok(None);
        };

        if hops >= request.max_redirects() {
            return Err(Error::TooManyRedirects {
                max: request.max_redirects(),
            });
        }

        let resolved = target::resolve_location(target.url(), location)?;
        let next_url = target::normalize(resolved.as_str(), &BTreeMap::new())?;
        debug!(
            status = %response.status(),
            from = request.url(),
            to = next_url.as_str(),
            "following redirect"
        );
        Ok(Some(request.redirected(next_url.to_string(), response.status())))
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.pool.close_all();
    }
}

fn remaining(deadline: Option<Instant>) -> Result<Option<Duration>> {
    match deadline {
        None => Ok(None),
        Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
            Some(left) if !left.is_zero() => Ok(Some(left)),
            _ => Err(Error::Timeout("total")),
        },
    }
}

fn cap(timeout: Option<Duration>, budget: Option<Duration>) -> Option<Duration> {
    match (timeout, budget) {
        (Some(t), Some(b)) => Some(t.min(b)),
        (t, b) => t.or(b),
    }
}

/// Body slices with progress reporting, see [`Client::stream`]
pub struct BodyStream<F> {
    chunks: crate::http::response::Chunks,
    total: usize,
    on_progress: F,
}

impl<F> BodyStream<F> {
    /// The announced `Content-Length`, 0 when absent
    pub fn total(&self) -> usize {
        self.total
    }
}

impl<F: FnMut(usize, usize)> Iterator for BodyStream<F> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        let chunk = self.chunks.next()?;
        (self.on_progress)(chunk.len(), self.total);
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::TimeoutConfig;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_client_is_shareable() {
        assert_send_sync::<Client>();
    }

    #[test]
    fn test_prepare_applies_defaults_beneath_request() {
        let config = ClientConfig::builder()
            .header("Accept", "*/*")
            .header("User-Agent", "default")
            .cookie("sid", "default")
            .verify(false)
            .build()
            .unwrap();
        let client = Client::with_config(config).unwrap();

        let request = Request::builder(Method::Get, "http://example.com/a?z=1#frag")
            .header("User-Agent", "mine")
            .param("a", "2")
            .build();
        let prepared = client.prepare(request).unwrap();

        assert_eq!(prepared.url(), "http://example.com/a?a=2&z=1");
        assert!(prepared.params().is_empty());
        assert_eq!(prepared.headers().get("User-Agent"), Some("mine"));
        assert_eq!(prepared.headers().get("Accept"), Some("*/*"));
        assert_eq!(prepared.cookies().get("sid").map(String::as_str), Some("default"));
        assert_eq!(prepared.verify(), Some(false));
        assert_eq!(prepared.timeout().and_then(|t| t.connect), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_default_header_swap_affects_later_requests_only() {
        let client = Client::new();
        let request = || Request::builder(Method::Get, "http://example.com/").build();
        let before = client.prepare(request()).unwrap();

        client.set_default_header("X-Tenant", "blue");
        client.set_default_cookie("theme", "dark");
        let after = client.prepare(request()).unwrap();

        assert!(before.headers().get("X-Tenant").is_none());
        assert_eq!(after.headers().get("X-Tenant"), Some("blue"));
        assert_eq!(after.cookie_header().as_deref(), Some("theme=dark"));
    }

    #[test]
    fn test_base_url_joins_relative_paths() {
        let config = ClientConfig::builder()
            .base_url("http://api.example.com/v1/")
            .build()
            .unwrap();
        let client = Client::with_config(config).unwrap();

        let relative = client.prepare(Request::builder(Method::Get, "/users").build()).unwrap();
        assert_eq!(relative.url(), "http://api.example.com/v1/users");

        let absolute = client
            .prepare(Request::builder(Method::Get, "https://other.example.com/x").build())
            .unwrap();
        assert_eq!(absolute.url(), "https://other.example.com/x");
    }

    #[test]
    fn test_unsupported_scheme_is_invalid_url() {
        let client = Client::new();
        let result = client.execute(Request::builder(Method::Get, "ftp://example.com/").build());
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_expired_budget_fails_before_connecting() {
        let client = Client::new();
        let request = Request::builder(Method::Get, "http://127.0.0.1:9/")
            .timeout(TimeoutConfig::total(Duration::ZERO))
            .cache_policy(CachePolicy::Never)
            .build();

        assert!(matches!(client.execute(request), Err(Error::Timeout("total"))));
        assert_eq!(client.pool_stats(), PoolStats::default());
    }

    #[test]
    fn test_cap_takes_the_smaller_bound() {
        let short = Some(Duration::from_secs(1));
        let long = Some(Duration::from_secs(5));
        assert_eq!(cap(long, short), short);
        assert_eq!(cap(short, long), short);
        assert_eq!(cap(None, long), long);
        assert_eq!(cap(long, None), long);
        assert_eq!(cap(None, None), None);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = ClientConfig::default();
        config.cache_max_entries = 0;
        assert!(matches!(Client::with_config(config), Err(Error::InvalidConfig(_))));
    }
}
