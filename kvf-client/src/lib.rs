//! # KV Facade Client
//!
//! Purpose: Provide a small, synchronous cache client for Redis-compatible
//! stores: a bounded connection pool, a typed facade over the key and
//! sorted-set commands, and parsers for the store's diagnostic output.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections; wait a bounded time
//!    when all are leased.
//! 2. **Scoped Leases**: Every command runs on a lease that is released on
//!    every exit path.
//! 3. **Normalized Errors**: Callers see `PoolExhausted`, `CacheUnavailable`,
//!    or `InvalidArgument`, nothing finer.
//! 4. **Protocol Clarity**: RESP2 is encoded and parsed explicitly.
//!
//! ```no_run
//! use kvf_client::{CacheFacade, FacadeConfig};
//!
//! let cache = CacheFacade::with_config(FacadeConfig::new("127.0.0.1:6379"))?;
//! cache.set_with_ttl("Session:42", "alice", 30_000)?;
//! assert_eq!(cache.get("session:42")?.as_deref(), Some("alice"));
//! # Ok::<(), kvf_client::CacheError>(())
//! ```

mod config;
mod error;
mod facade;
mod info;
mod metrics;
mod pool;
mod resp;

pub use config::{ConfigError, FacadeConfig};
pub use error::{BackendError, CacheError, CacheResult};
pub use facade::{CacheFacade, LoadError, Pttl};
pub use info::{parse_memory_usage, parse_server_info, KeyCount, MemoryUsage, ServerStat};
pub use metrics::{FacadeMetrics, LatencySnapshot, MetricsSnapshot};
pub use pool::{ConnectionPool, Lease, PoolStatus};
pub use resp::RespValue;
