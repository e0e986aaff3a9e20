//! Client configuration
//!
//! [`ClientConfig`] gathers pool, cache, timeout and TLS settings plus the
//! defaults applied to every request. Build one with [`ClientConfig::builder`]
//! or start from `ClientConfig::default()` and adjust fields directly.

use crate::http::tls::{TlsConfig, TlsVersion};
use crate::http::{Error, Headers, Result, TimeoutConfig, Version};
use crate::pool::PoolConfig;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-read and per-write timeout
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cache TTL
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default cache capacity
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;

/// Client configuration (immutable once the client is built)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Prefix for request URLs that are not absolute
    pub base_url: Option<String>,
    pub pool: PoolConfig,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    /// Timeouts for requests that set none
    pub timeout: TimeoutConfig,
    /// TLS verification for requests that do not choose
    pub verify: bool,
    /// Protocol version for requests that do not choose
    pub version: Version,
    /// Headers sent with every request, beneath the request's own
    pub headers: Headers,
    /// Cookies sent with every request, beneath the request's own
    pub cookies: BTreeMap<String, String>,
    pub tls: TlsConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: None,
            pool: PoolConfig::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            timeout: TimeoutConfig {
                connect: Some(DEFAULT_CONNECT_TIMEOUT),
                read: Some(DEFAULT_IO_TIMEOUT),
                write: Some(DEFAULT_IO_TIMEOUT),
                total: None,
            },
            verify: true,
            version: Version::Http11,
            headers: Headers::new(),
            cookies: BTreeMap::new(),
            tls: TlsConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration builder starting from the defaults
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Reject settings the pool or cache cannot work with
    pub fn validate(&self) -> Result<()> {
        if let Some(base) = &self.base_url {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                return Err(Error::InvalidConfig(format!("base URL must be absolute: {}", base)));
            }
        }
        if self.pool.max_size == 0 {
            return Err(Error::InvalidConfig("pool size must be at least 1".to_string()));
        }
        if self.pool.max_idle_per_key == 0 {
            return Err(Error::InvalidConfig(
                "idle connections per key must be at least 1".to_string(),
            ));
        }
        if self.pool.idle_timeout.is_zero() {
            return Err(Error::InvalidConfig("idle timeout must be non-zero".to_string()));
        }
        if self.cache_max_entries == 0 {
            return Err(Error::InvalidConfig(
                "cache capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
    idle_per_key: Option<usize>,
}

impl ClientConfigBuilder {
    fn new() -> Self {
        ClientConfigBuilder {
            config: ClientConfig::default(),
            idle_per_key: None,
        }
    }

    /// Resolve relative request URLs against `base`
    pub fn base_url(mut self, base: impl Into<String>) -> Self {
        self.config.base_url = Some(base.into());
        self
    }

    /// Maximum open connections; also the idle-per-key ceiling unless set
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.pool.max_size = max;
        self
    }

    pub fn max_idle_per_key(mut self, max: usize) -> Self {
        self.idle_per_key = Some(max);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool.idle_timeout = timeout;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn cache_max_entries(mut self, max: usize) -> Self {
        self.config.cache_max_entries = max;
        self
    }

    /// Replace all default timeouts
    pub fn timeout(mut self, timeout: TimeoutConfig) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout.connect = Some(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout.read = Some(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout.write = Some(timeout);
        self
    }

    /// Budget for a whole call, redirects included
    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout.total = Some(timeout);
        self
    }

    /// Enable/disable TLS peer verification by default
    pub fn verify(mut self, verify: bool) -> Self {
        self.config.verify = verify;
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.config.version = version;
        self
    }

    /// Add a default header, replacing an earlier one with the same name
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.set(name, value);
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.cookies.insert(name.into(), value.into());
        self
    }

    /// Lowest TLS version offered
    pub fn tls_min_version(mut self, version: TlsVersion) -> Self {
        self.config.tls.min_version = version;
        self
    }

    /// PEM bundle trusted in addition to the system roots
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tls.ca_file = Some(path.into());
        self
    }

    /// Build and validate the configuration
    pub fn build(mut self) -> Result<ClientConfig> {
        self.config.pool.max_idle_per_key =
            self.idle_per_key.unwrap_or(self.config.pool.max_size);
        self.config.validate()?;
        Ok(self.config)
    }
}
