//! # In-Memory Store
//!
//! Strings with millisecond TTLs and score-ordered sorted sets behind a
//! single lock, covering the command subset the facade speaks.
//!
//! ## Design Principles
//!
//! 1. **TTL Fast Path**: Expiration is checked on access; `purge_expired`
//!    sweeps the rest in the background.
//! 2. **Dual-Index Sorted Sets**: A member→score map for point lookups and a
//!    `(score, member)` ordered set for range scans.
//! 3. **Redis Semantics**: Replies mirror Redis for missing keys, wrong
//!    types, and expired entries.
//!
//! ```text
//! MemoryStore
//!   └── inner: RwLock<HashMap<Vec<u8>, Entry>>
//!         └── Entry { value, expires_at }
//!               └── Value::Str(bytes) | Value::ZSet(SortedSet)
//!                     └── SortedSet { scores: HashMap, order: BTreeSet<(score, member)> }
//! ```

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use thiserror::Error;

use crate::glob::glob_match;

/// Errors a command can hit inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// TTL state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    Missing,
    NoExpiry,
    ExpiresIn(Duration),
}

/// One end of a score range, e.g. `1.5`, `(1.5`, `-inf`, `+inf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBound {
    pub value: f64,
    pub exclusive: bool,
}

impl ScoreBound {
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let (exclusive, digits) = match raw.split_first() {
            Some((b'(', rest)) => (true, rest),
            _ => (false, raw),
        };
        let value = parse_score(digits)?;
        Some(ScoreBound { value, exclusive })
    }

    fn above_min(&self, score: f64) -> bool {
        if self.exclusive {
            score > self.value
        } else {
            score >= self.value
        }
    }

    fn below_max(&self, score: f64) -> bool {
        if self.exclusive {
            score < self.value
        } else {
            score <= self.value
        }
    }
}

/// Parses a score, accepting `inf`, `+inf`, and `-inf`. NaN is rejected.
pub fn parse_score(raw: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(raw).ok()?;
    let value = match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        other => other.parse::<f64>().ok()?,
    };
    (!value.is_nan()).then_some(value)
}

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<Vec<u8>, f64>,
    order: BTreeSet<(OrderedFloat<f64>, Vec<u8>)>,
}

impl SortedSet {
    /// Inserts or rescores a member. Returns true when it was new.
    fn insert(&mut self, score: f64, member: Vec<u8>) -> bool {
        match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.order.remove(&(OrderedFloat(old), member.clone()));
                self.order.insert((OrderedFloat(score), member));
                false
            }
            None => {
                self.order.insert((OrderedFloat(score), member));
                true
            }
        }
    }

    fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.order.remove(&(OrderedFloat(score), member.to_vec()));
                true
            }
            None => false,
        }
    }

    fn range(&self, min: ScoreBound, max: ScoreBound) -> Vec<Vec<u8>> {
        self.order
            .iter()
            .skip_while(|(score, _)| !min.above_min(score.0))
            .take_while(|(score, _)| max.below_max(score.0))
            .map(|(_, member)| member.clone())
            .collect()
    }

    fn size(&self) -> usize {
        self.scores.keys().map(|member| member.len() + 8).sum()
    }
}

#[derive(Debug)]
enum Value {
    Str(Vec<u8>),
    ZSet(SortedSet),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|deadline| deadline <= now).unwrap_or(false)
    }
}

/// The store. Share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<Vec<u8>, Entry>>,
}

/// Looks up a live entry, dropping it first if it has expired.
fn live<'a>(map: &'a mut HashMap<Vec<u8>, Entry>, key: &[u8], now: Instant) -> Option<&'a mut Entry> {
    if map.get(key).map(|entry| entry.is_expired(now)).unwrap_or(false) {
        map.remove(key);
        return None;
    }
    map.get_mut(key)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let mut map = self.inner.write();
        match live(&mut map, key, Instant::now()) {
            None => Ok(None),
            Some(Entry { value: Value::Str(data), .. }) => Ok(Some(data.clone())),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    /// Stores a string, replacing any value and clearing its TTL.
    pub fn set(&self, key: Vec<u8>, value: Vec<u8>, ttl: Option<Duration>) {
        let entry = Entry {
            value: Value::Str(value),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.inner.write().insert(key, entry);
    }

    /// Removes a key. Returns whether a live entry was removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        match self.inner.write().remove(key) {
            Some(entry) => !entry.is_expired(now),
            None => false,
        }
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        live(&mut self.inner.write(), key, Instant::now()).is_some()
    }

    pub fn ttl(&self, key: &[u8]) -> TtlStatus {
        let now = Instant::now();
        let mut map = self.inner.write();
        match live(&mut map, key, now) {
            None => TtlStatus::Missing,
            Some(Entry { expires_at: None, .. }) => TtlStatus::NoExpiry,
            Some(Entry { expires_at: Some(deadline), .. }) => TtlStatus::ExpiresIn(*deadline - now),
        }
    }

    /// Sets a TTL on an existing key. Returns false for missing keys.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> bool {
        let now = Instant::now();
        match live(&mut self.inner.write(), key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            None => false,
        }
    }

    pub fn zadd(&self, key: &[u8], score: f64, member: Vec<u8>) -> StoreResult<bool> {
        let mut map = self.inner.write();
        if live(&mut map, key, Instant::now()).is_none() {
            map.insert(
                key.to_vec(),
                Entry {
                    value: Value::ZSet(SortedSet::default()),
                    expires_at: None,
                },
            );
        }
        match map.get_mut(key) {
            Some(Entry { value: Value::ZSet(set), .. }) => Ok(set.insert(score, member)),
            _ => Err(StoreError::WrongType),
        }
    }

    pub fn zrange_by_score(&self, key: &[u8], min: ScoreBound, max: ScoreBound) -> StoreResult<Vec<Vec<u8>>> {
        let mut map = self.inner.write();
        match live(&mut map, key, Instant::now()) {
            None => Ok(Vec::new()),
            Some(Entry { value: Value::ZSet(set), .. }) => Ok(set.range(min, max)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    pub fn zremrange_by_score(&self, key: &[u8], min: ScoreBound, max: ScoreBound) -> StoreResult<usize> {
        self.with_zset(key, |set| {
            let doomed = set.range(min, max);
            for member in &doomed {
                set.remove(member);
            }
            doomed.len()
        })
    }

    pub fn zrem(&self, key: &[u8], members: &[Vec<u8>]) -> StoreResult<usize> {
        self.with_zset(key, |set| members.iter().filter(|member| set.remove(member)).count())
    }

    /// Runs `op` on a sorted set and drops the key once the set is empty.
    fn with_zset<F>(&self, key: &[u8], op: F) -> StoreResult<usize>
    where
        F: FnOnce(&mut SortedSet) -> usize,
    {
        let mut map = self.inner.write();
        let (removed, now_empty) = match live(&mut map, key, Instant::now()) {
            None => return Ok(0),
            Some(Entry { value: Value::ZSet(set), .. }) => {
                let removed = op(set);
                (removed, set.scores.is_empty())
            }
            Some(_) => return Err(StoreError::WrongType),
        };
        if now_empty {
            map.remove(key);
        }
        Ok(removed)
    }

    /// Live keys matching a glob pattern, in no particular order.
    pub fn keys(&self, pattern: &[u8]) -> Vec<Vec<u8>> {
        let now = Instant::now();
        self.inner
            .read()
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn dbsize(&self) -> usize {
        let now = Instant::now();
        self.inner.read().values().filter(|entry| !entry.is_expired(now)).count()
    }

    /// Approximate payload bytes held (keys + values + scores).
    pub fn used_bytes(&self) -> usize {
        self.inner
            .read()
            .iter()
            .map(|(key, entry)| {
                key.len()
                    + match &entry.value {
                        Value::Str(data) => data.len(),
                        Value::ZSet(set) => set.size(),
                    }
            })
            .sum()
    }

    /// Removes every expired entry; returns how many were dropped.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut map = self.inner.write();
        let before = map.len();
        map.retain(|_, entry| !entry.is_expired(now));
        before - map.len()
    }

    /// Diagnostic text in the store's `INFO` format.
    pub fn info(&self) -> String {
        let now = Instant::now();
        let (keys, expires) = {
            let map = self.inner.read();
            let live = map.values().filter(|entry| !entry.is_expired(now));
            live.fold((0usize, 0usize), |(keys, expires), entry| {
                (keys + 1, expires + entry.expires_at.is_some() as usize)
            })
        };
        let used = self.used_bytes();

        let mut info = String::new();
        info.push_str("# Server\r\n");
        info.push_str("redis_version:7.0.0\r\n");
        info.push_str(&format!("kvf_devstore_version:{}\r\n", env!("CARGO_PKG_VERSION")));
        info.push_str("\r\n# Memory\r\n");
        info.push_str(&format!("used_memory:{}\r\n", used));
        info.push_str(&format!("used_memory_human:{}B\r\n", used));
        info.push_str("\r\n# Keyspace\r\n");
        info.push_str(&format!("db0:keys={},expires={}\r\n", keys, expires));
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(raw: &str) -> ScoreBound {
        ScoreBound::parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn set_get_roundtrip() {
        let store = MemoryStore::new();
        store.set(b"alpha".to_vec(), b"value".to_vec(), None);
        assert_eq!(store.get(b"alpha").unwrap(), Some(b"value".to_vec()));
        assert!(store.delete(b"alpha"));
        assert_eq!(store.get(b"alpha").unwrap(), None);
        assert!(!store.delete(b"alpha"));
    }

    #[test]
    fn expire_hides_value() {
        let store = MemoryStore::new();
        store.set(b"alpha".to_vec(), b"value".to_vec(), None);
        assert!(store.expire(b"alpha", Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.get(b"alpha").unwrap(), None);
        assert_eq!(store.ttl(b"alpha"), TtlStatus::Missing);
        assert!(!store.expire(b"alpha", Duration::from_secs(1)));
    }

    #[test]
    fn ttl_reports_missing_or_expiry() {
        let store = MemoryStore::new();
        assert_eq!(store.ttl(b"missing"), TtlStatus::Missing);

        store.set(b"alpha".to_vec(), b"value".to_vec(), None);
        assert_eq!(store.ttl(b"alpha"), TtlStatus::NoExpiry);

        store.expire(b"alpha", Duration::from_secs(10));
        match store.ttl(b"alpha") {
            TtlStatus::ExpiresIn(left) => assert!(left <= Duration::from_secs(10)),
            other => panic!("unexpected ttl {:?}", other),
        }

        store.set(b"alpha".to_vec(), b"again".to_vec(), None);
        assert_eq!(store.ttl(b"alpha"), TtlStatus::NoExpiry);
    }

    #[test]
    fn purge_expired_removes_entries() {
        let store = MemoryStore::new();
        store.set(b"a".to_vec(), b"1".to_vec(), Some(Duration::from_millis(1)));
        store.set(b"b".to_vec(), b"2".to_vec(), None);
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(store.purge_expired(Instant::now()), 1);
        assert_eq!(store.dbsize(), 1);
    }

    #[test]
    fn sorted_set_orders_by_score_then_member() {
        let store = MemoryStore::new();
        assert!(store.zadd(b"z", 2.0, b"b".to_vec()).unwrap());
        assert!(store.zadd(b"z", 1.0, b"c".to_vec()).unwrap());
        assert!(store.zadd(b"z", 1.0, b"a".to_vec()).unwrap());
        assert!(!store.zadd(b"z", 3.0, b"c".to_vec()).unwrap());

        let all = store.zrange_by_score(b"z", bound("-inf"), bound("+inf")).unwrap();
        assert_eq!(all, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        let open = store.zrange_by_score(b"z", bound("(1"), bound("3")).unwrap();
        assert_eq!(open, vec![b"b".to_vec(), b"c".to_vec()]);

        assert!(store.zrange_by_score(b"z", bound("3"), bound("1")).unwrap().is_empty());
    }

    #[test]
    fn sorted_set_removals_drop_empty_key() {
        let store = MemoryStore::new();
        store.zadd(b"z", 1.0, b"a".to_vec()).unwrap();
        store.zadd(b"z", 2.0, b"b".to_vec()).unwrap();
        store.zadd(b"z", 5.0, b"c".to_vec()).unwrap();

        assert_eq!(store.zremrange_by_score(b"z", bound("0"), bound("2")).unwrap(), 2);
        assert_eq!(store.zrem(b"z", &[b"c".to_vec(), b"zz".to_vec()]).unwrap(), 1);
        assert!(!store.exists(b"z"));
    }

    #[test]
    fn wrong_type_is_reported() {
        let store = MemoryStore::new();
        store.set(b"s".to_vec(), b"v".to_vec(), None);
        store.zadd(b"z", 1.0, b"a".to_vec()).unwrap();
        assert_eq!(store.zadd(b"s", 1.0, b"a".to_vec()), Err(StoreError::WrongType));
        assert_eq!(store.get(b"z"), Err(StoreError::WrongType));
    }

    #[test]
    fn keys_and_info() {
        let store = MemoryStore::new();
        store.set(b"user:1".to_vec(), b"a".to_vec(), None);
        store.set(b"user:2".to_vec(), b"b".to_vec(), Some(Duration::from_secs(60)));
        store.set(b"order:1".to_vec(), b"c".to_vec(), None);

        let mut keys = store.keys(b"user:*");
        keys.sort();
        assert_eq!(keys, vec![b"user:1".to_vec(), b"user:2".to_vec()]);

        let info = store.info();
        assert!(info.contains("db0:keys=3,expires=1\r\n"));
        assert!(info.contains(&format!("used_memory:{}\r\n", store.used_bytes())));
    }

    #[test]
    fn parses_score_bounds() {
        assert_eq!(bound("(2.5"), ScoreBound { value: 2.5, exclusive: true });
        assert_eq!(bound("-INF").value, f64::NEG_INFINITY);
        assert!(ScoreBound::parse(b"nan").is_none());
        assert!(ScoreBound::parse(b"abc").is_none());
    }
}
