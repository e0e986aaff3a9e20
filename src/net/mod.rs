//! TCP connection establishment
//!
//! Resolves a host and tries each address in turn, bounding every attempt by
//! the connect timeout.

use crate::http::{Error, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace};

/// Open a TCP connection to `host:port`
///
/// A `None` timeout blocks until the OS gives up. Exceeding the timeout on
/// the last address yields `Error::Timeout("connect")`; every other failure
/// is `Error::ConnectionFailed`.
pub fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::ConnectionFailed(format!("resolve {}:{}: {}", host, port, e)))?
        .collect();

    if addrs.is_empty() {
        return Err(Error::ConnectionFailed(format!(
            "resolve {}:{}: no addresses",
            host, port
        )));
    }

    let mut last_err = None;
    for addr in addrs {
        match connect_addr(&addr, timeout) {
            Ok(stream) => {
                debug!(%addr, "connected");
                return Ok(stream);
            }
            Err(e) => {
                trace!(%addr, error = %e, "connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
            Error::Timeout("connect")
        }
        Some(e) => Error::ConnectionFailed(format!("connect {}:{}: {}", host, port, e)),
        None => Error::ConnectionFailed(format!("connect {}:{}", host, port)),
    })
}

fn connect_addr(addr: &SocketAddr, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(true)?;
    socket.set_keepalive(true)?;

    let sockaddr = SockAddr::from(*addr);
    match timeout.filter(|d| !d.is_zero()) {
        Some(timeout) => socket.connect_timeout(&sockaddr, timeout)?,
        None => socket.connect(&sockaddr)?,
    }

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_connect_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = connect_tcp("127.0.0.1", port, Some(Duration::from_secs(1))).unwrap();
        assert!(stream.nodelay().unwrap());
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_tcp("127.0.0.1", port, Some(Duration::from_secs(1))).unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
    }

    #[test]
    fn test_unresolvable_host() {
        let err = connect_tcp("host.invalid", 80, Some(Duration::from_secs(1))).unwrap_err();
        assert!(err.is_connect());
    }
}
