//! Connection pool
//!
//! Idle connections are kept per [`PoolKey`] in FIFO queues, oldest at the
//! front. `active` counts every open connection the pool is accountable
//! for, idle or lent. Both live under one mutex that is never held across
//! a connect, a TLS handshake or a socket close.
//!
//! A lent connection travels inside a [`Lease`]. Dropping the lease hands
//! the connection back exactly once: into the idle queue if it is still
//! healthy, otherwise closed and uncounted.

use crate::http::tls::{TlsConfig, TlsConnector, TlsError};
use crate::http::{Error, HttpSession, Result, Target, Transport, Version};
use crate::http::session::FdSessionOps;
use crate::net;
use once_cell::sync::OnceCell;
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Identity of interchangeable connections
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    host: String,
    port: u16,
    tls: bool,
    version: Version,
    verify: bool,
}

impl PoolKey {
    /// Key for a verified connection
    pub fn new(host: impl Into<String>, port: u16, tls: bool, version: Version) -> Self {
        PoolKey {
            host: host.into(),
            port,
            tls,
            version,
            verify: true,
        }
    }

    /// Key for the origin of `target`
    pub fn for_target(target: &Target, version: Version, verify: bool) -> Self {
        PoolKey::new(target.host(), target.port(), target.is_tls(), version).with_verify(verify)
    }

    /// Set whether TLS peers are verified; part of the key identity
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn verify(&self) -> bool {
        self.verify
    }
}

/// Pool sizing and idle policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Ceiling on open connections across all keys
    pub max_size: usize,
    /// Ceiling on idle connections kept per key
    pub max_idle_per_key: usize,
    /// Idle connections older than this are closed
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_size: 100,
            max_idle_per_key: 100,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Open connections, idle ones included
    pub active: usize,
    /// Connections waiting in idle queues
    pub idle: usize,
}

/// An open connection together with the key it was opened for
pub struct PooledConnection {
    key: PoolKey,
    session: HttpSession<Transport>,
    generation: u64,
}

impl PooledConnection {
    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn session(&self) -> &HttpSession<Transport> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut HttpSession<Transport> {
        &mut self.session
    }

    fn close(mut self) {
        if let Err(e) = self.session.close() {
            debug!(host = %self.key.host, error = %e, "error closing connection");
        }
    }
}

struct IdleEntry {
    returned_at: Instant,
    conn: PooledConnection,
}

#[derive(Default)]
struct PoolState {
    idle: HashMap<PoolKey, VecDeque<IdleEntry>>,
    active: usize,
    /// Bumped by `close_all`; connections from an older generation are no
    /// longer counted in `active`.
    generation: u64,
}

enum Candidate {
    Idle(PooledConnection),
    Reserved(u64),
}

/// Thread-safe keyed connection pool
pub struct ConnectionPool {
    config: PoolConfig,
    tls: TlsConfig,
    connector: OnceCell<TlsConnector>,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig, tls: TlsConfig) -> Self {
        ConnectionPool {
            config,
            tls,
            connector: OnceCell::new(),
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Borrow a connection for `key`
    ///
    /// Stale idle entries are reaped first. A reused connection is checked
    /// and dropped if the peer has gone away. A new connection is opened
    /// only while fewer than `max_size` are open; the reserved slot is
    /// given back if opening fails.
    pub fn acquire(&self, key: &PoolKey, connect_timeout: Option<Duration>) -> Result<Lease<'_>> {
        loop {
            let mut stale = Vec::new();
            let candidate = {
                let mut state = self.lock();
                self.reap_locked(&mut state, &mut stale);

                match state.idle.get_mut(key).and_then(VecDeque::pop_front) {
                    Some(entry) => Some(Candidate::Idle(entry.conn)),
                    None if state.active < self.config.max_size => {
                        state.active += 1;
                        Some(Candidate::Reserved(state.generation))
                    }
                    None => None,
                }
            };
            close_all_of(stale);

            match candidate {
                Some(Candidate::Idle(mut conn)) => {
                    if conn.session.is_reusable() {
                        debug!(host = %key.host, port = key.port, "reusing idle connection");
                        return Ok(Lease::new(self, conn));
                    }
                    debug!(host = %key.host, port = key.port, "idle connection closed by peer");
                    self.forget(conn);
                }
                Some(Candidate::Reserved(generation)) => {
                    return match self.open(key, connect_timeout) {
                        Ok(session) => {
                            debug!(
                                host = %key.host,
                                port = key.port,
                                tls = key.tls,
                                "opened connection"
                            );
                            Ok(Lease::new(
                                self,
                                PooledConnection {
                                    key: key.clone(),
                                    session,
                                    generation,
                                },
                            ))
                        }
                        Err(e) => {
                            self.give_back_slot(generation);
                            Err(e)
                        }
                    };
                }
                None => {
                    debug!(host = %key.host, max = self.config.max_size, "pool exhausted");
                    return Err(Error::PoolExhausted {
                        max: self.config.max_size,
                    });
                }
            }
        }
    }

    fn open(&self, key: &PoolKey, timeout: Option<Duration>) -> Result<HttpSession<Transport>> {
        let stream = net::connect_tcp(&key.host, key.port, timeout)?;

        let transport = if key.tls {
            let connector = self.connector.get_or_try_init(|| self.tls.connector())?;
            let tls = connector
                .connect(stream, &key.host, key.verify, timeout)
                .map_err(|e| match e {
                    TlsError::HandshakeTimeout => Error::Timeout("connect"),
                    other => Error::ConnectionFailed(format!(
                        "TLS handshake with {}: {}",
                        key.host, other
                    )),
                })?;
            Transport::Tls(Box::new(tls))
        } else {
            Transport::Plain(FdSessionOps::new(stream))
        };

        Ok(HttpSession::new(transport))
    }

    fn give_back_slot(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.active = state.active.saturating_sub(1);
        }
    }

    /// Close a connection and stop counting it
    fn forget(&self, conn: PooledConnection) {
        self.give_back_slot(conn.generation);
        conn.close();
    }

    /// Return a lent connection
    ///
    /// Failed, non-keep-alive and peer-closed connections are closed. A
    /// healthy one joins the back of its idle queue unless the queue is
    /// full.
    pub fn release(&self, mut conn: PooledConnection) {
        let failed = conn.session.is_failed();
        let reusable = !failed && conn.session.is_reusable();

        let mut state = self.lock();

        if conn.generation != state.generation {
            drop(state);
            debug!(host = %conn.key.host, "closing connection from before close_all");
            conn.close();
            return;
        }

        if !reusable {
            state.active = state.active.saturating_sub(1);
            drop(state);
            if failed {
                warn!(host = %conn.key.host, port = conn.key.port, "discarding failed connection");
            } else {
                debug!(
                    host = %conn.key.host,
                    port = conn.key.port,
                    "closing non-reusable connection"
                );
            }
            conn.close();
            return;
        }

        let queue = state.idle.entry(conn.key.clone()).or_default();
        if queue.len() < self.config.max_idle_per_key {
            queue.push_back(IdleEntry {
                returned_at: Instant::now(),
                conn,
            });
            return;
        }

        state.active = state.active.saturating_sub(1);
        drop(state);
        debug!(host = %conn.key.host, "idle queue full, closing connection");
        conn.close();
    }

    /// Close idle connections older than the idle timeout
    ///
    /// Returns how many were closed.
    pub fn reap(&self) -> usize {
        let mut stale = Vec::new();
        {
            let mut state = self.lock();
            self.reap_locked(&mut state, &mut stale);
        }
        let count = stale.len();
        close_all_of(stale);
        count
    }

    fn reap_locked(&self, state: &mut PoolState, stale: &mut Vec<PooledConnection>) {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout;

        for queue in state.idle.values_mut() {
            while let Some(front) = queue.front() {
                if now.duration_since(front.returned_at) <= idle_timeout {
                    break;
                }
                if let Some(entry) = queue.pop_front() {
                    stale.push(entry.conn);
                }
            }
        }
        state.idle.retain(|_, queue| !queue.is_empty());
        state.active = state.active.saturating_sub(stale.len());

        if !stale.is_empty() {
            debug!(count = stale.len(), "reaped idle connections");
        }
    }

    /// Close every idle connection and reset accounting
    ///
    /// Connections currently lent out are closed when their lease ends.
    pub fn close_all(&self) {
        let idle = {
            let mut state = self.lock();
            state.generation += 1;
            state.active = 0;
            std::mem::take(&mut state.idle)
        };

        let conns: Vec<PooledConnection> = idle
            .into_values()
            .flat_map(|queue| queue.into_iter().map(|entry| entry.conn))
            .collect();
        if !conns.is_empty() {
            debug!(count = conns.len(), "closing idle connections");
        }
        close_all_of(conns);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            active: state.active,
            idle: state.idle.values().map(VecDeque::len).sum(),
        }
    }
}

fn close_all_of(conns: Vec<PooledConnection>) {
    for conn in conns {
        conn.close();
    }
}

/// A connection on loan from the pool
///
/// Dropping the lease releases the connection; [`Lease::discard`] closes it
/// instead.
pub struct Lease<'p> {
    pool: &'p ConnectionPool,
    conn: Option<PooledConnection>,
}

impl<'p> Lease<'p> {
    fn new(pool: &'p ConnectionPool, conn: PooledConnection) -> Self {
        Lease {
            pool,
            conn: Some(conn),
        }
    }

    /// Close the connection rather than returning it
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.forget(conn);
        }
    }
}

impl Deref for Lease<'_> {
    type Target = PooledConnection;

    fn deref(&self) -> &PooledConnection {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("lease accessed after release"),
        }
    }
}

impl DerefMut for Lease<'_> {
    fn deref_mut(&mut self) -> &mut PooledConnection {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("lease accessed after release"),
        }
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
