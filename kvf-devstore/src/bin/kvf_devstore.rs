//! Standalone dev store.
//!
//! Listen address: first argument, else `KVF_DEVSTORE_ADDR`, else
//! `127.0.0.1:6379`. Log filter comes from `RUST_LOG` (default `info`).

use std::env;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kvf_devstore::{serve, MemoryStore};

const DEFAULT_ADDR: &str = "127.0.0.1:6379";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr = env::args()
        .nth(1)
        .or_else(|| env::var("KVF_DEVSTORE_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %listener.local_addr()?, "dev store listening");

    let store = Arc::new(MemoryStore::new());
    tokio::select! {
        result = serve(listener, store) => result.context("dev store stopped")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
