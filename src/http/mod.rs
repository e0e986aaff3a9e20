//! HTTP/1.1 wire layer for snapwire
//!
//! This module holds everything that touches bytes on a socket: message
//! types, header handling, status-line and header parsing, chunked framing,
//! and the session abstraction that lets plain TCP and TLS share one code path.
//!
//! # Architecture
//!
//! - `SessionOps` defines the transport operations (poll, read, write, close)
//! - `HttpSession` layers read/write timeouts, a total deadline and a
//!   failure flag on top of any `SessionOps`
//! - `WireClient` serializes one `Request` and parses one `Response` over a
//!   borrowed session; it never owns the connection
//!
//! # Examples
//!
//! ```no_run
//! use snapwire::http::{session, wire, Method, Request, Target};
//! use std::net::TcpStream;
//!
//! let stream = TcpStream::connect("127.0.0.1:8080").unwrap();
//! let mut session = session::from_tcp_stream(stream);
//!
//! let request = Request::builder(Method::Get, "http://127.0.0.1:8080/").build();
//! let target = Target::parse(request.url()).unwrap();
//! let response = wire::send_and_receive(&mut session, &request, &target).unwrap();
//! assert_eq!(response.status().code(), 200);
//! ```

pub mod chunked;
pub mod headers;
pub mod message;
pub mod parser;
pub mod request;
pub mod response;
pub mod session;
pub mod target;
pub mod tls;
pub mod wire;

pub use headers::Headers;
pub use message::{Method, Status, Version};
pub use request::{Body, CachePolicy, Request, RequestBuilder, TimeoutConfig};
pub use response::Response;
pub use session::{HttpSession, SessionOps, Transport};
pub use target::Target;
pub use wire::WireClient;

use std::io;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the client
///
/// No raw `std::io::Error` escapes this type: I/O failures are classified
/// into `Timeout`, `ConnectionClosed` or `ConnectionFailed` on conversion.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection establishment or socket I/O failed; the connection is unusable
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer closed the connection before a full message was read
    #[error("Connection closed")]
    ConnectionClosed,

    /// A connect, read, write or total budget was exceeded
    #[error("Timeout during {0}")]
    Timeout(&'static str),

    /// Malformed status line, header or body framing
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The pool reached its active-connection ceiling
    #[error("Connection pool exhausted ({max} active connections)")]
    PoolExhausted { max: usize },

    /// The redirect chain exceeded the configured maximum
    #[error("Too many redirects (max {max})")]
    TooManyRedirects { max: usize },

    /// Unsupported scheme or unparseable target
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Final status in the 400-599 range, raised on request by the caller
    #[error("HTTP status {status}")]
    Http {
        status: u16,
        response: Box<Response>,
    },

    /// A lazy request body failed while producing chunks
    #[error("Request body error: {0}")]
    Body(String),

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether this error is a timeout of any kind
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Whether the error happened at the connection level
    pub fn is_connect(&self) -> bool {
        matches!(self, Error::ConnectionFailed(_) | Error::ConnectionClosed)
    }

    /// Whether the connection involved in this error must never be reused
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed(_)
                | Error::ConnectionClosed
                | Error::Timeout(_)
                | Error::Protocol(_)
                | Error::Body(_)
        )
    }

    /// The response carried by an `Http` error
    pub fn response(&self) -> Option<&Response> {
        match self {
            Error::Http { response, .. } => Some(response),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        // Errors that crossed an `io::Write` adapter come back unchanged.
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            let kind = err.kind();
            if let Some(Ok(inner)) = err.into_inner().map(|inner| inner.downcast::<Error>()) {
                return *inner;
            }
            return Error::ConnectionFailed(format!("{:?}", kind));
        }

        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout("socket I/O"),
            io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::ConnectionFailed(err.to_string()),
        }
    }
}

/// Maximum number of headers accepted in one response
pub const MAX_HEADERS: usize = 100;

/// Maximum length of a status, header or chunk-size line
pub const MAX_LINE_LEN: usize = 16 * 1024;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
