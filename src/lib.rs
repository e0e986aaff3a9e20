//! snapwire - blocking HTTP/1.1 client
//!
//! This crate provides a synchronous HTTP/1.1 client with keep-alive
//! connection pooling, a TTL response cache and redirect following, over
//! plain TCP or OpenSSL-backed TLS.
//!
//! - [`client`] orchestrates one call from defaults to the final response
//! - [`pool`] lends keyed connections and keeps idle ones for reuse
//! - [`cache`] stores responses by request fingerprint
//! - [`http`] frames requests and parses responses on the wire
//! - [`net`] opens TCP connections

pub mod cache;
pub mod client;
pub mod config;
pub mod http;
pub mod net;
pub mod pool;

pub use cache::CacheStats;
pub use client::{BodyStream, Client};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use http::{
    Body, CachePolicy, Error, Headers, Method, Request, RequestBuilder, Response, Result, Status,
    TimeoutConfig, Version,
};
pub use pool::PoolStats;
