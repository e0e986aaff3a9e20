//! Request targets
//!
//! URL normalization (fragment stripped, query sorted by key), redirect
//! resolution, and the connection coordinates derived from a URL.

use super::{Error, Result};
use std::collections::BTreeMap;
use url::{Host, Url};

/// Normalize `raw`, folding `params` into its query
///
/// The fragment is removed and query pairs are sorted by key. Pairs sharing
/// a key keep their relative order, so normalization is idempotent.
pub fn normalize(raw: &str, params: &BTreeMap<String, String>) -> Result<Url> {
    let mut url = Url::parse(raw).map_err(|e| Error::InvalidUrl(format!("{}: {}", raw, e)))?;
    check_scheme(&url)?;

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    Ok(url)
}

/// Resolve a `Location` value against the URL that produced it
pub fn resolve_location(base: &Url, location: &str) -> Result<Url> {
    let url = base
        .join(location)
        .map_err(|e| Error::InvalidUrl(format!("redirect to {}: {}", location, e)))?;
    check_scheme(&url)?;
    Ok(url)
}

fn check_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::InvalidUrl(format!("Unsupported scheme: {}", other))),
    }
}

/// Connection coordinates and request-line target for one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: Url,
    host: String,
    port: u16,
    tls: bool,
}

impl Target {
    /// Parse and validate an absolute http(s) URL
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|e| Error::InvalidUrl(format!("{}: {}", raw, e)))?;
        Self::from_url(url)
    }

    /// Build a target from an already parsed URL
    pub fn from_url(url: Url) -> Result<Self> {
        check_scheme(&url)?;

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(Error::InvalidUrl(format!("{}: missing host", url))),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidUrl(format!("{}: missing port", url)))?;
        let tls = url.scheme() == "https";

        Ok(Target {
            url,
            host,
            port,
            tls,
        })
    }

    /// Host to connect to, without IPv6 brackets
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the connection is TLS-wrapped
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `PATH[?QUERY]` for the request line
    pub fn path_and_query(&self) -> String {
        let path = match self.url.path() {
            "" => "/",
            path => path,
        };
        match self.url.query() {
            Some(query) if !query.is_empty() => format!("{}?{}", path, query),
            _ => path.to_string(),
        }
    }

    /// `Host` header value; the port appears only when it is not the default
    pub fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or(&self.host);
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}
