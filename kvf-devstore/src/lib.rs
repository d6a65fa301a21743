//! # KV Facade Dev Store
//!
//! Purpose: An in-memory, Redis-compatible store speaking just the command
//! subset `kvf-client` uses, so the facade can be exercised end to end
//! without an external server.
//!
//! ## Usage
//!
//! - Run the `kvf-devstore` binary for a standalone store.
//! - Call `spawn_background()` in tests for a store on an ephemeral port;
//!   dropping the handle shuts it down.

mod engine;
mod glob;
mod protocol;
mod server;

use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::oneshot;
use tracing::warn;

pub use engine::{parse_score, MemoryStore, ScoreBound, StoreError, StoreResult, TtlStatus};
pub use glob::glob_match;
pub use protocol::{Reply, RespError, RespParser};
pub use server::{dispatch, handle_connection, serve, EXPIRE_INTERVAL};

/// A dev store running on its own runtime thread.
pub struct DevStoreHandle {
    addr: SocketAddr,
    store: Arc<MemoryStore>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DevStoreHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Direct access to the backing store, e.g. to seed or inspect state.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

impl Drop for DevStoreHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Starts a store on `127.0.0.1` with an ephemeral port.
pub fn spawn_background() -> io::Result<DevStoreHandle> {
    let listener = StdTcpListener::bind("127.0.0.1:0")?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;
    let store = Arc::new(MemoryStore::new());
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let served = Arc::clone(&store);
    let thread = std::thread::Builder::new()
        .name("kvf-devstore".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(err) => {
                        warn!(error = %err, "dev store listener setup failed");
                        return;
                    }
                };
                tokio::select! {
                    result = serve(listener, served) => {
                        if let Err(err) = result {
                            warn!(error = %err, "dev store stopped");
                        }
                    }
                    _ = shutdown_rx => {}
                }
            });
        })?;

    Ok(DevStoreHandle {
        addr,
        store,
        shutdown: Some(shutdown_tx),
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;

    #[test]
    fn background_store_answers_ping() {
        let handle = spawn_background().unwrap();
        let mut stream = TcpStream::connect(handle.addr()).unwrap();
        stream.write_all(b"*1\r\n$4\r\nPING\r\n").unwrap();

        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).unwrap();
        assert_eq!(line, "+PONG\r\n");
    }

    #[test]
    fn handle_exposes_store() {
        let handle = spawn_background().unwrap();
        handle.store().set(b"seeded".to_vec(), b"1".to_vec(), None);
        assert_eq!(handle.store().dbsize(), 1);
    }
}
