//! # Server Diagnostics
//!
//! Parses the store's `INFO` text into typed records for admin dashboards.
//!
//! The text is line-delimited `key:value` pairs (`\r\n` or `\n`). Section
//! headers such as `# Memory` and blank lines carry no colon and are skipped.
//! The value is the segment between the first and second colon, so
//! `executable:/a:b` reads as `/a`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const USED_MEMORY: &str = "used_memory";

/// One `key:value` line of the diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStat {
    pub key: String,
    pub value: String,
}

/// Number of keys in the selected database, stamped with capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCount {
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    pub count: i64,
}

/// Memory used by the store, stamped with capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// `used_memory` with any trailing unit character removed.
    pub used_memory: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

/// Parses every `key:value` line, in order.
pub fn parse_server_info(text: &str) -> Vec<ServerStat> {
    text.lines().filter_map(split_line).collect()
}

/// Extracts `used_memory`, or `None` when the field is absent.
pub fn parse_memory_usage(text: &str) -> Option<MemoryUsage> {
    let stat = text
        .lines()
        .filter_map(split_line)
        .find(|stat| stat.key == USED_MEMORY)?;

    let used_memory = stat
        .value
        .strip_suffix(|c: char| !c.is_ascii_digit())
        .unwrap_or(&stat.value)
        .to_string();

    Some(MemoryUsage {
        used_memory,
        created_at: now_millis(),
    })
}

fn split_line(line: &str) -> Option<ServerStat> {
    let line = line.trim_end_matches('\r');
    let mut segments: Vec<&str> = line.split(':').collect();
    // "key:" has no value segment worth keeping.
    while segments.last() == Some(&"") {
        segments.pop();
    }
    if segments.len() < 2 {
        return None;
    }
    Some(ServerStat {
        key: segments[0].to_string(),
        value: segments[1].to_string(),
    })
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
