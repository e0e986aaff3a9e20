//! TLS session operations
//!
//! This module implements the SessionOps trait for TLS connections,
//! enabling transparent switching between plain TCP and TLS I/O.

use crate::http::session::{poll_fd, PollEvents, SessionOps};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::{ErrorCode, SslStream};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// TLS session operations
///
/// Implements SessionOps trait for TLS-encrypted connections.
/// Wraps an OpenSSL SslStream and provides poll/read/write/close operations.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    failed: bool,
}

impl TlsSessionOps {
    pub(crate) fn new(stream: SslStream<TcpStream>) -> Self {
        TlsSessionOps {
            stream,
            failed: false,
        }
    }

    /// Negotiated protocol, e.g. "TLSv1.3"
    pub fn protocol_version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }

    /// Check if TLS failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // Decrypted bytes already buffered by OpenSSL never show up on the fd.
        if events == PollEvents::Read && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }

        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        self.stream.read(buf).map_err(|e| {
            self.failed = true;
            Error::from(e)
        })
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        self.stream.write(buf).map_err(|e| {
            self.failed = true;
            Error::from(e)
        })
    }

    fn flush(&mut self) -> HttpResult<()> {
        self.stream.flush().map_err(|e| {
            self.failed = true;
            Error::from(e)
        })
    }

    fn close(&mut self) -> HttpResult<()> {
        // Perform SSL shutdown if not failed
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        use std::net::Shutdown;
        self.stream
            .get_mut()
            .shutdown(Shutdown::Both)
            .map_err(Error::from)
    }

    fn peer_closed(&mut self) -> bool {
        if self.failed || self.stream.ssl().pending() > 0 {
            return true;
        }

        let fd = self.stream.get_ref().as_raw_fd();
        match poll_fd(fd, PollEvents::Read, Some(Duration::ZERO)) {
            Ok(false) => return false,
            Ok(true) => {}
            Err(_) => return true,
        }

        // Raw bytes are waiting. Let OpenSSL process them without blocking:
        // a session ticket leaves the session idle, close_notify or EOF ends
        // it, and unsolicited application data makes it unusable.
        if self.stream.get_ref().set_nonblocking(true).is_err() {
            self.failed = true;
            return true;
        }
        let closed = match self.stream.ssl_read(&mut [0u8; 1]) {
            Ok(_) => true,
            Err(e) => !matches!(e.code(), ErrorCode::WANT_READ | ErrorCode::WANT_WRITE),
        };
        let restored = self.stream.get_ref().set_nonblocking(false).is_ok();

        if closed || !restored {
            self.failed = true;
            return true;
        }
        false
    }

    fn set_io_timeouts(&self, read: Option<Duration>, write: Option<Duration>) -> HttpResult<()> {
        let tcp = self.stream.get_ref();
        tcp.set_read_timeout(read)?;
        tcp.set_write_timeout(write)?;
        Ok(())
    }
}
