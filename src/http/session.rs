//! Session operations abstraction
//!
//! `SessionOps` lets the wire layer run unchanged over plain TCP and TLS.
//! `HttpSession` adds what the client needs on top of a raw transport:
//! per-operation read/write timeouts, a deadline shared by a whole redirect
//! chain, and a sticky failure flag that keeps a broken socket out of the
//! idle pool.

use super::tls::TlsSessionOps;
use super::{Error, Result};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

/// Session operations trait
///
/// This trait defines the operations that can be performed on a session,
/// abstracting over plain TCP and TLS connections.
pub trait SessionOps {
    /// Poll the session for events
    ///
    /// Returns true if the session is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flush buffered output
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Close the session
    fn close(&mut self) -> Result<()>;

    /// Non-blocking check: has the peer closed, or left the stream unusable?
    ///
    /// May consume protocol records that arrived while the stream sat idle.
    fn peer_closed(&mut self) -> bool;

    /// Socket-level timeouts bounding a single blocking call
    fn set_io_timeouts(&self, _read: Option<Duration>, _write: Option<Duration>) -> Result<()> {
        Ok(())
    }
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
}

/// Wait until `fd` is ready for `events`, at most `timeout`
///
/// `None` waits forever. Returns false when the timeout elapsed first.
pub(crate) fn poll_fd(fd: RawFd, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
        },
        revents: 0,
    };

    // Round sub-millisecond budgets up so they do not turn into a zero-wait poll.
    let timeout_ms = match timeout {
        None => -1,
        Some(d) if d.is_zero() => 0,
        Some(d) => d.as_millis().clamp(1, i32::MAX as u128) as i32,
    };

    loop {
        // SAFETY: `pfd` is a valid, exclusively borrowed pollfd and nfds is 1.
        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

        if result >= 0 {
            return Ok(result > 0);
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(Error::from(err));
        }
    }
}

fn non_zero(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|d| !d.is_zero())
}

/// HTTP session wrapping a transport with session operations
pub struct HttpSession<S: SessionOps> {
    session: S,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    deadline: Option<Instant>,
    failed: bool,
    keep_alive: bool,
}

impl<S: SessionOps> HttpSession<S> {
    /// Create a new HTTP session
    pub fn new(session: S) -> Self {
        HttpSession {
            session,
            read_timeout: Some(Duration::from_secs(10)),
            write_timeout: Some(Duration::from_secs(10)),
            deadline: None,
            failed: false,
            keep_alive: true,
        }
    }

    /// Set the per-operation timeouts
    pub fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) -> Result<()> {
        self.read_timeout = read;
        self.write_timeout = write;
        self.session
            .set_io_timeouts(non_zero(read), non_zero(write))
    }

    /// Set the absolute deadline every operation must finish by
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Effective wait for the next operation: its own limit capped by the deadline
    fn budget(&self, limit: Option<Duration>) -> Result<Option<Duration>> {
        let Some(deadline) = self.deadline else {
            return Ok(limit);
        };
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or(Error::Timeout("total"))?;
        Ok(Some(limit.map_or(remaining, |l| l.min(remaining))))
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    /// Read data with timeout
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let result = self.read_inner(buf);
        self.track(result)
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize> {
        let timeout = self.budget(self.read_timeout)?;
        if !self.session.poll(PollEvents::Read, timeout)? {
            return Err(Error::Timeout("read"));
        }
        self.session.read(buf)
    }

    /// Write data with timeout
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let result = self.write_inner(buf);
        self.track(result)
    }

    fn write_inner(&mut self, buf: &[u8]) -> Result<usize> {
        let timeout = self.budget(self.write_timeout)?;
        if !self.session.poll(PollEvents::Write, timeout)? {
            return Err(Error::Timeout("write"));
        }
        self.session.write(buf)
    }

    /// Write the whole buffer, retrying short writes
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut written = 0;

        while written < buf.len() {
            let n = self.write(&buf[written..])?;
            if n == 0 {
                self.failed = true;
                return Err(Error::ConnectionClosed);
            }
            written += n;
        }

        Ok(())
    }

    /// Flush the transport
    pub fn flush(&mut self) -> Result<()> {
        let result = self.session.flush();
        self.track(result)
    }

    /// Close the session
    pub fn close(&mut self) -> Result<()> {
        self.keep_alive = false;
        self.session.close()
    }

    /// Record that the stream is in an unknown state
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    /// Whether any operation on this session has failed
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Keep the connection open after the current exchange or not
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    /// Whether the connection may go back to the idle pool
    pub fn is_reusable(&mut self) -> bool {
        !self.failed && self.keep_alive && !self.session.peer_closed()
    }

    /// Get a reference to the underlying session
    pub fn get_ref(&self) -> &S {
        &self.session
    }
}

/// `io::Write` view, so framing encoders can write straight to the socket
impl<S: SessionOps> Write for HttpSession<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        HttpSession::write(self, buf).map_err(into_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        HttpSession::flush(self).map_err(into_io)
    }
}

fn into_io(err: Error) -> io::Error {
    let kind = match err {
        Error::Timeout(_) => io::ErrorKind::TimedOut,
        Error::ConnectionClosed => io::ErrorKind::UnexpectedEof,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}

/// Plain file descriptor session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create a new FD session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        poll_fd(self.stream.as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        use std::net::Shutdown;
        self.stream
            .shutdown(Shutdown::Both)
            .map_err(Error::from)
    }

    fn peer_closed(&mut self) -> bool {
        // An idle HTTP/1.1 stream has nothing to read: EOF, a reset and
        // unsolicited bytes all make it unusable.
        poll_fd(self.stream.as_raw_fd(), PollEvents::Read, Some(Duration::ZERO))
            .unwrap_or(true)
    }

    fn set_io_timeouts(&self, read: Option<Duration>, write: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(read)?;
        self.stream.set_write_timeout(write)?;
        Ok(())
    }
}

/// A pooled transport: plain TCP or TLS
pub enum Transport {
    Plain(FdSessionOps),
    Tls(Box<TlsSessionOps>),
}

impl Transport {
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// The TCP stream underneath, TLS or not
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Transport::Plain(s) => s.stream(),
            Transport::Tls(s) => s.get_ref(),
        }
    }
}

impl SessionOps for Transport {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        match self {
            Transport::Plain(s) => s.poll(events, timeout),
            Transport::Tls(s) => s.poll(events, timeout),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            Transport::Tls(s) => s.flush(),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            Transport::Plain(s) => s.close(),
            Transport::Tls(s) => s.close(),
        }
    }

    fn peer_closed(&mut self) -> bool {
        match self {
            Transport::Plain(s) => s.peer_closed(),
            Transport::Tls(s) => s.peer_closed(),
        }
    }

    fn set_io_timeouts(&self, read: Option<Duration>, write: Option<Duration>) -> Result<()> {
        match self {
            Transport::Plain(s) => s.set_io_timeouts(read, write),
            Transport::Tls(s) => s.set_io_timeouts(read, write),
        }
    }
}

/// Helper to create an HTTP session from a TCP stream
pub fn from_tcp_stream(stream: TcpStream) -> HttpSession<FdSessionOps> {
    HttpSession::new(FdSessionOps::new(stream))
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport for parser tests

    use super::*;
    use std::io::Cursor;

    /// Replays canned input, optionally in small reads, and records output
    pub(crate) struct MemorySession {
        input: Cursor<Vec<u8>>,
        pub(crate) output: Vec<u8>,
        max_read: usize,
    }

    impl MemorySession {
        pub(crate) fn new(input: &[u8]) -> Self {
            MemorySession {
                input: Cursor::new(input.to_vec()),
                output: Vec::new(),
                max_read: usize::MAX,
            }
        }

        /// Deliver at most `max_read` bytes per read call
        pub(crate) fn trickle(mut self, max_read: usize) -> Self {
            self.max_read = max_read;
            self
        }
    }

    impl SessionOps for MemorySession {
        fn poll(&self, _events: PollEvents, _timeout: Option<Duration>) -> Result<bool> {
            Ok(true)
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = buf.len().min(self.max_read);
            Ok(self.input.read(&mut buf[..n])?)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn peer_closed(&mut self) -> bool {
            false
        }
    }
}
