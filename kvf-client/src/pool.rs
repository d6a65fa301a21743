//! # Connection Pool
//!
//! Purpose: Bound and reuse TCP connections to the store for the blocking
//! facade.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections
//!    and counters; connects and commands run unlocked.
//! 3. **Bounded Waiting**: When every slot is leased, callers park on a
//!    condition variable until a lease comes back or `acquire_timeout`
//!    elapses, then get `PoolExhausted`.
//! 4. **RAII Release**: A `Lease` returns its connection in `Drop`, so each
//!    lease is released exactly once on every exit path.
//!
//! ```text
//! ConnectionPool (Clone handle)
//!   └── inner: Arc<PoolInner>
//!         ├── state: Mutex<PoolState { idle, total, leased }>
//!         └── available: Condvar   (signalled on every release)
//! ```

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::config::FacadeConfig;
use crate::error::{BackendError, CacheError, CacheResult};
use crate::resp::{encode_command, read_response, RespValue};

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Open connections, idle or leased.
    pub total: usize,
    /// Connections waiting in the idle list.
    pub idle: usize,
    /// Connections currently held by callers.
    pub leased: usize,
    /// Configured upper bound on `total`.
    pub max_total: usize,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
    leased: usize,
}

struct PoolInner {
    config: FacadeConfig,
    state: Mutex<PoolState>,
    available: Condvar,
    next_id: AtomicU64,
}

impl PoolInner {
    /// Puts a connection back, or closes it when it is broken or surplus.
    fn give_back(&self, conn: Connection, reusable: bool) {
        let mut state = self.state.lock();
        state.leased -= 1;
        let surplus = if reusable && state.idle.len() < self.config.max_idle {
            state.idle.push_back(conn);
            None
        } else {
            state.total -= 1;
            Some(conn)
        };
        drop(state);
        self.available.notify_one();

        if let Some(conn) = surplus {
            debug!(conn_id = conn.id, reusable, "closing pooled connection");
        }
    }

    /// Frees a slot reserved for a connect attempt that failed.
    fn forget_slot(&self) {
        let mut state = self.state.lock();
        state.leased -= 1;
        state.total -= 1;
        drop(state);
        self.available.notify_one();
    }
}

/// Connection pool handle.
///
/// Cloning is cheap; every clone shares the same connections and bounds.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates an empty pool. Connections are opened lazily on demand.
    pub fn new(config: FacadeConfig) -> CacheResult<Self> {
        config.validate()?;
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
            leased: 0,
        };
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
                available: Condvar::new(),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Leases a connection, waiting up to `acquire_timeout` for one to free up.
    pub fn acquire(&self) -> CacheResult<Lease> {
        let config = &self.inner.config;
        let started = Instant::now();
        let deadline = started + config.acquire_timeout;
        let mut state = self.inner.state.lock();

        loop {
            if let Some(conn) = state.idle.pop_front() {
                state.leased += 1;
                drop(state);
                debug!(conn_id = conn.id, "reusing pooled connection");
                return Ok(Lease::new(self.inner.clone(), conn));
            }

            if state.total < config.max_total {
                state.total += 1;
                state.leased += 1;
                drop(state);
                return self.open_reserved();
            }

            if self.inner.available.wait_until(&mut state, deadline).timed_out()
                && state.idle.is_empty()
                && state.total >= config.max_total
            {
                let waited = started.elapsed();
                warn!(max_total = config.max_total, ?waited, "connection pool exhausted");
                return Err(CacheError::PoolExhausted { waited });
            }
        }
    }

    /// Opens a connection into a slot already counted in `total`/`leased`.
    fn open_reserved(&self) -> CacheResult<Lease> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        match Connection::connect(id, &self.inner.config) {
            Ok(conn) => {
                debug!(conn_id = id, addr = %self.inner.config.addr, "opened connection");
                Ok(Lease::new(self.inner.clone(), conn))
            }
            Err(err) => {
                self.inner.forget_slot();
                warn!(addr = %self.inner.config.addr, error = %err, "connect failed");
                Err(CacheError::unavailable(err))
            }
        }
    }

    /// Current connection counts.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            total: state.total,
            idle: state.idle.len(),
            leased: state.leased,
            max_total: self.inner.config.max_total,
        }
    }

    /// The validated configuration this pool was built with.
    pub fn config(&self) -> &FacadeConfig {
        &self.inner.config
    }
}

/// A connection borrowed from the pool.
///
/// Dropping the lease releases it. Transport failures mark the connection as
/// broken so it is closed instead of going back to the idle list.
pub struct Lease {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    reusable: bool,
}

impl Lease {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        Lease {
            pool,
            conn: Some(conn),
            reusable: true,
        }
    }

    /// Sends one command and reads its reply.
    ///
    /// Error replies from the store come back as `BackendError::Server`.
    pub fn exec(&mut self, args: &[&[u8]]) -> Result<RespValue, BackendError> {
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(BackendError::Protocol),
        };
        match conn.exec(args) {
            Ok(RespValue::Error(message)) => Err(BackendError::Server(message)),
            Ok(value) => Ok(value),
            Err(err) => {
                if err.poisons_connection() {
                    self.reusable = false;
                }
                Err(err)
            }
        }
    }

    /// Pool-unique id of the underlying connection.
    pub fn connection_id(&self) -> u64 {
        self.conn.as_ref().map(|conn| conn.id).unwrap_or_default()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // A panic mid-command can leave unread reply bytes on the socket.
            let reusable = self.reusable && !std::thread::panicking();
            self.pool.give_back(conn, reusable);
        }
    }
}

/// Single TCP connection with reusable buffers.
struct Connection {
    id: u64,
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    fn connect(id: u64, config: &FacadeConfig) -> Result<Self, BackendError> {
        let stream = connect_stream(&config.addr, config.connect_timeout)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        // Small request/reply payloads; Nagle only adds latency.
        stream.set_nodelay(true)?;

        Ok(Connection {
            id,
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        })
    }

    fn exec(&mut self, args: &[&[u8]]) -> Result<RespValue, BackendError> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_response(&mut self.reader, &mut self.line_buf)
    }
}

fn connect_stream(addr: &str, timeout: Option<Duration>) -> Result<TcpStream, BackendError> {
    let candidates: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|_| BackendError::InvalidAddress(addr.to_string()))?
        .collect();

    let mut last_err = None;
    for candidate in candidates {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&candidate, timeout),
            None => TcpStream::connect(candidate),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }

    match last_err {
        Some(err) => Err(BackendError::Io(err)),
        None => Err(BackendError::InvalidAddress(addr.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    // The listener's backlog completes handshakes, so no accept loop is needed.
    fn listener_config(max_idle: usize, max_total: usize) -> (TcpListener, FacadeConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = FacadeConfig::new(listener.local_addr().unwrap().to_string())
            .with_pool(max_idle, max_total)
            .with_acquire_timeout(Duration::from_millis(50));
        (listener, config)
    }

    #[test]
    fn lease_returns_to_idle_on_drop() {
        let (_listener, config) = listener_config(1, 1);
        let pool = ConnectionPool::new(config).unwrap();

        let lease = pool.acquire().unwrap();
        let first_id = lease.connection_id();
        assert_eq!(pool.status().leased, 1);
        drop(lease);

        let status = pool.status();
        assert_eq!((status.total, status.idle, status.leased), (1, 1, 0));

        let again = pool.acquire().unwrap();
        assert_eq!(again.connection_id(), first_id);
    }

    #[test]
    fn surplus_connections_close_above_max_idle() {
        let (_listener, config) = listener_config(1, 2);
        let pool = ConnectionPool::new(config).unwrap();

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.connection_id(), b.connection_id());
        drop(a);
        drop(b);

        let status = pool.status();
        assert_eq!((status.total, status.idle), (1, 1));
    }

    #[test]
    fn exhausted_pool_times_out() {
        let (_listener, config) = listener_config(1, 1);
        let pool = ConnectionPool::new(config).unwrap();

        let _held = pool.acquire().unwrap();
        let started = Instant::now();
        let err = pool.acquire().err().unwrap();
        assert!(err.is_pool_exhausted());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn lease_dropped_during_panic_is_discarded() {
        let (_listener, config) = listener_config(1, 1);
        let pool = ConnectionPool::new(config).unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _lease = pool.acquire().unwrap();
            panic!("caller panicked while holding a lease");
        }));
        assert!(outcome.is_err());

        let status = pool.status();
        assert_eq!((status.total, status.idle, status.leased), (0, 0, 0));
    }

    #[test]
    fn connect_failure_frees_slot() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let pool = ConnectionPool::new(FacadeConfig::new(addr).with_pool(1, 1)).unwrap();

        assert!(pool.acquire().err().unwrap().is_unavailable());
        assert_eq!(pool.status().total, 0);
        assert_eq!(pool.status().leased, 0);
    }

    #[test]
    fn rejects_unresolvable_address() {
        let pool = ConnectionPool::new(FacadeConfig::new("not an address")).unwrap();
        let err = pool.acquire().err().unwrap();
        assert!(err.is_unavailable());
    }
}
