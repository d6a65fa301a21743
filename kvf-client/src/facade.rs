//! # Cache Facade
//!
//! Purpose: Expose a compact, blocking API over the pooled connections for
//! the key and sorted-set commands an admin backend needs, plus typed views
//! of the store's diagnostics.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheFacade` hides pooling and protocol details.
//! 2. **Scoped Execution**: Each operation runs inside `execute`, which
//!    leases a connection, runs the command, and releases the lease when it
//!    goes out of scope, whatever the outcome.
//! 3. **One Error Kind per Cause**: Backend failures of any sort surface as
//!    `CacheError::CacheUnavailable`; absence is `Option`, never an error.
//! 4. **Case-Insensitive Keys**: Keys are lower-cased before every command.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::FacadeConfig;
use crate::error::{BackendError, CacheError, CacheResult};
use crate::info::{now_millis, parse_memory_usage, parse_server_info, KeyCount, MemoryUsage, ServerStat};
use crate::metrics::{FacadeMetrics, MetricsSnapshot};
use crate::pool::{ConnectionPool, Lease};

/// Remaining lifetime of a key, mirroring `PTTL` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pttl {
    /// Key is missing or already expired (`-2`).
    Missing,
    /// Key exists without expiration (`-1`).
    NoExpiry,
    /// Key expires after the given duration.
    ExpiresIn(Duration),
}

impl Pttl {
    /// The raw `PTTL` value: -2, -1, or remaining milliseconds.
    pub fn as_millis(&self) -> i64 {
        match self {
            Pttl::Missing => -2,
            Pttl::NoExpiry => -1,
            Pttl::ExpiresIn(remaining) => remaining.as_millis() as i64,
        }
    }
}

/// Failure of `CacheFacade::get_or_load`.
#[derive(Debug)]
pub enum LoadError<E> {
    /// The cache refused the input before any lookup.
    Cache(CacheError),
    /// The loader failed.
    Loader(E),
}

impl<E: fmt::Display> fmt::Display for LoadError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Cache(err) => write!(f, "{}", err),
            LoadError::Loader(err) => write!(f, "loader failed: {}", err),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for LoadError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Cache(err) => Some(err),
            LoadError::Loader(err) => Some(err),
        }
    }
}

/// Blocking cache client over a shared connection pool.
///
/// Clones share the pool and the metrics.
#[derive(Clone)]
pub struct CacheFacade {
    pool: ConnectionPool,
    metrics: Arc<FacadeMetrics>,
}

impl CacheFacade {
    /// Creates a facade with default configuration for `addr`.
    pub fn connect(addr: impl Into<String>) -> CacheResult<Self> {
        Self::with_config(FacadeConfig::new(addr))
    }

    pub fn with_config(config: FacadeConfig) -> CacheResult<Self> {
        Ok(Self::with_pool(ConnectionPool::new(config)?))
    }

    /// Wraps a pool built elsewhere, e.g. one shared by several facades.
    pub fn with_pool(pool: ConnectionPool) -> Self {
        CacheFacade {
            pool,
            metrics: Arc::new(FacadeMetrics::new()),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Runs `op` against a leased connection.
    ///
    /// The lease is released when this call returns, on success and failure
    /// alike. Any `BackendError` from `op` becomes `CacheUnavailable`.
    pub fn execute<T, F>(&self, command: &'static str, op: F) -> CacheResult<T>
    where
        F: FnOnce(&mut Lease) -> Result<T, BackendError>,
    {
        let started = Instant::now();
        self.metrics.record_start();

        let result = self.pool.acquire().and_then(|mut lease| {
            op(&mut lease).map_err(|err| {
                warn!(command, conn_id = lease.connection_id(), error = %err, "cache command failed");
                CacheError::unavailable(err)
            })
        });

        let elapsed = started.elapsed();
        self.metrics.record_end(elapsed, result.is_err());
        debug!(command, ?elapsed, ok = result.is_ok(), "cache command finished");
        result
    }

    /// Fetches a value. `Ok(None)` when the key is missing.
    pub fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let key = normalize_key(key);
        self.execute("GET", |conn| {
            conn.exec(&[b"GET", key.as_bytes()])?.into_optional_string("GET")
        })
    }

    /// Stores a value without expiry, replacing any previous value and TTL.
    ///
    /// Returns the store's status reply (`OK`).
    pub fn set(&self, key: &str, value: &str) -> CacheResult<String> {
        let key = normalize_key(key);
        self.execute("SET", |conn| {
            conn.exec(&[b"SET", key.as_bytes(), value.as_bytes()])?.into_status("SET")
        })
    }

    /// Stores a value, then applies a TTL in milliseconds.
    ///
    /// This is `SET` followed by `PEXPIRE` on separate round-trips and is not
    /// atomic: if the second call fails or the process dies in between, the
    /// key is left without an expiry. The `PEXPIRE` failure is still reported.
    pub fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> CacheResult<String> {
        if ttl_ms == 0 {
            return Err(CacheError::InvalidArgument("ttl must be positive"));
        }
        let status = self.set(key, value)?;
        self.pexpire(key, ttl_ms)?;
        Ok(status)
    }

    /// Deletes keys and returns how many existed.
    pub fn del(&self, keys: &[&str]) -> CacheResult<i64> {
        if keys.is_empty() {
            return Err(CacheError::InvalidArgument("del needs at least one key"));
        }
        let keys: Vec<String> = keys.iter().map(|key| normalize_key(key)).collect();
        self.execute("DEL", |conn| {
            let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
            args.push(b"DEL");
            args.extend(keys.iter().map(|key| key.as_bytes()));
            conn.exec(&args)?.into_integer("DEL")
        })
    }

    pub fn exists(&self, key: &str) -> CacheResult<bool> {
        let key = normalize_key(key);
        self.execute("EXISTS", |conn| {
            Ok(conn.exec(&[b"EXISTS", key.as_bytes()])?.into_integer("EXISTS")? > 0)
        })
    }

    pub fn pttl(&self, key: &str) -> CacheResult<Pttl> {
        let key = normalize_key(key);
        self.execute("PTTL", |conn| {
            match conn.exec(&[b"PTTL", key.as_bytes()])?.into_integer("PTTL")? {
                -2 => Ok(Pttl::Missing),
                -1 => Ok(Pttl::NoExpiry),
                ms if ms >= 0 => Ok(Pttl::ExpiresIn(Duration::from_millis(ms as u64))),
                _ => Err(BackendError::UnexpectedResponse("PTTL")),
            }
        })
    }

    /// Sets a TTL in milliseconds. `false` when the key does not exist.
    pub fn pexpire(&self, key: &str, ttl_ms: u64) -> CacheResult<bool> {
        if ttl_ms == 0 {
            return Err(CacheError::InvalidArgument("ttl must be positive"));
        }
        let key = normalize_key(key);
        let ttl = ttl_ms.to_string();
        self.execute("PEXPIRE", |conn| {
            Ok(conn
                .exec(&[b"PEXPIRE", key.as_bytes(), ttl.as_bytes()])?
                .into_integer("PEXPIRE")?
                == 1)
        })
    }

    /// Adds or rescores a sorted-set member. Returns 1 when it was new.
    pub fn zadd(&self, key: &str, score: f64, member: &str) -> CacheResult<i64> {
        if !score.is_finite() {
            return Err(CacheError::InvalidArgument("score must be finite"));
        }
        let key = normalize_key(key);
        let score = score.to_string();
        self.execute("ZADD", |conn| {
            conn.exec(&[b"ZADD", key.as_bytes(), score.as_bytes(), member.as_bytes()])?
                .into_integer("ZADD")
        })
    }

    /// Members with scores inside `[min, max]`, ascending by score.
    ///
    /// Bounds use the store's syntax: plain numbers, `-inf`/`+inf`, or a
    /// `(` prefix for an exclusive bound. `min > max` yields no members.
    pub fn zrange_by_score(&self, key: &str, min: &str, max: &str) -> CacheResult<Vec<String>> {
        let key = normalize_key(key);
        self.execute("ZRANGEBYSCORE", |conn| {
            conn.exec(&[b"ZRANGEBYSCORE", key.as_bytes(), min.as_bytes(), max.as_bytes()])?
                .into_strings("ZRANGEBYSCORE")
        })
    }

    /// Removes members with scores inside `[start, end]`.
    pub fn zremrange_by_score(&self, key: &str, start: &str, end: &str) -> CacheResult<i64> {
        let key = normalize_key(key);
        self.execute("ZREMRANGEBYSCORE", |conn| {
            conn.exec(&[b"ZREMRANGEBYSCORE", key.as_bytes(), start.as_bytes(), end.as_bytes()])?
                .into_integer("ZREMRANGEBYSCORE")
        })
    }

    /// Removes members and returns how many were present.
    pub fn zrem(&self, key: &str, members: &[&str]) -> CacheResult<i64> {
        if members.is_empty() {
            return Err(CacheError::InvalidArgument("zrem needs at least one member"));
        }
        let key = normalize_key(key);
        self.execute("ZREM", |conn| {
            let mut args: Vec<&[u8]> = Vec::with_capacity(members.len() + 2);
            args.push(b"ZREM");
            args.push(key.as_bytes());
            args.extend(members.iter().map(|member| member.as_bytes()));
            conn.exec(&args)?.into_integer("ZREM")
        })
    }

    /// Keys matching a glob pattern.
    ///
    /// This walks the whole keyspace on the store; keep it off hot paths.
    pub fn keys(&self, pattern: &str) -> CacheResult<HashSet<String>> {
        let pattern = normalize_key(pattern);
        self.execute("KEYS", |conn| {
            let keys = conn.exec(&[b"KEYS", pattern.as_bytes()])?.into_strings("KEYS")?;
            Ok(keys.into_iter().collect())
        })
    }

    /// Every `key:value` pair of the store's `INFO` output, in order.
    pub fn server_info(&self) -> CacheResult<Vec<ServerStat>> {
        let text = self.info_text()?;
        Ok(parse_server_info(&text))
    }

    /// Number of keys in the current database.
    pub fn key_count(&self) -> CacheResult<KeyCount> {
        let count = self.execute("DBSIZE", |conn| conn.exec(&[b"DBSIZE"])?.into_integer("DBSIZE"))?;
        Ok(KeyCount {
            created_at: now_millis(),
            count,
        })
    }

    /// `used_memory` from `INFO`, or `None` if the store does not report it.
    pub fn memory_usage(&self) -> CacheResult<Option<MemoryUsage>> {
        let text = self.info_text()?;
        Ok(parse_memory_usage(&text))
    }

    /// Round-trips a `PING`; usable as a health probe.
    pub fn ping(&self) -> CacheResult<String> {
        self.execute("PING", |conn| conn.exec(&[b"PING"])?.into_status("PING"))
    }

    /// Cache-aside read.
    ///
    /// Returns the cached value when present. On a miss, or when the cache
    /// cannot be reached, calls `loader` and writes its value back (with
    /// `ttl_ms` when given). Write-back failures are logged and swallowed so
    /// an unavailable cache degrades to direct loads. No write-back is tried
    /// when the read failed with `PoolExhausted`.
    pub fn get_or_load<E, F>(&self, key: &str, ttl_ms: Option<u64>, loader: F) -> Result<String, LoadError<E>>
    where
        F: FnOnce() -> Result<String, E>,
    {
        if ttl_ms == Some(0) {
            return Err(LoadError::Cache(CacheError::InvalidArgument("ttl must be positive")));
        }

        let pool_exhausted = match self.get(key) {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => false,
            Err(err) => {
                warn!(key, error = %err, "cache read failed, loading directly");
                err.is_pool_exhausted()
            }
        };

        let value = loader().map_err(LoadError::Loader)?;
        // The pool just timed out; a write-back would wait out the timeout again.
        if pool_exhausted {
            return Ok(value);
        }
        let stored = match ttl_ms {
            Some(ttl) => self.set_with_ttl(key, &value, ttl),
            None => self.set(key, &value),
        };
        if let Err(err) = stored {
            warn!(key, error = %err, "cache write-back failed");
        }
        Ok(value)
    }

    fn info_text(&self) -> CacheResult<String> {
        self.execute("INFO", |conn| conn.exec(&[b"INFO"])?.into_string("INFO"))
    }
}

/// Keys are case-insensitive: everything is stored lower-cased.
fn normalize_key(key: &str) -> String {
    key.to_lowercase()
}
