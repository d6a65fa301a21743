use std::collections::HashSet;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use kvf_client::{CacheError, CacheFacade, ConnectionPool, FacadeConfig};
use kvf_devstore::spawn_background;

#[test]
fn excess_callers_get_pool_exhausted() {
    let store = spawn_background().expect("dev store");
    let config = FacadeConfig::new(store.addr().to_string())
        .with_pool(2, 2)
        .with_acquire_timeout(Duration::from_millis(100));
    let pool = ConnectionPool::new(config).unwrap();
    let cache = CacheFacade::with_pool(pool.clone());

    let first = pool.acquire().unwrap();
    let second = pool.acquire().unwrap();
    assert_ne!(first.connection_id(), second.connection_id());

    let started = Instant::now();
    match cache.get("k") {
        Err(CacheError::PoolExhausted { waited }) => assert!(waited >= Duration::from_millis(100)),
        other => panic!("expected PoolExhausted, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(2));

    drop(first);
    assert_eq!(cache.get("k").unwrap(), None);
    drop(second);
    assert_eq!(pool.status().leased, 0);
}

#[test]
fn waiter_wakes_when_lease_returns() {
    let store = spawn_background().expect("dev store");
    let config = FacadeConfig::new(store.addr().to_string())
        .with_pool(1, 1)
        .with_acquire_timeout(Duration::from_secs(5));
    let pool = ConnectionPool::new(config).unwrap();

    let held = pool.acquire().unwrap();
    let held_id = held.connection_id();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire().map(|lease| lease.connection_id()))
    };

    thread::sleep(Duration::from_millis(50));
    drop(held);

    let reused = waiter.join().unwrap().unwrap();
    assert_eq!(reused, held_id);
}

#[test]
fn no_connection_is_leased_twice() {
    let store = spawn_background().expect("dev store");
    let config = FacadeConfig::new(store.addr().to_string())
        .with_pool(3, 3)
        .with_acquire_timeout(Duration::from_secs(10));
    let pool = ConnectionPool::new(config).unwrap();

    let in_use = Arc::new(Mutex::new(HashSet::new()));
    let start = Arc::new(Barrier::new(8));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let in_use = Arc::clone(&in_use);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..20 {
                    let lease = pool.acquire().unwrap();
                    let id = lease.connection_id();
                    assert!(in_use.lock().unwrap().insert(id), "connection {} leased twice", id);
                    thread::sleep(Duration::from_millis(1));
                    in_use.lock().unwrap().remove(&id);
                    drop(lease);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let status = pool.status();
    assert_eq!(status.leased, 0);
    assert!(status.total <= 3);
}

#[test]
fn concurrent_facade_calls_share_the_pool() {
    let store = spawn_background().expect("dev store");
    let config = FacadeConfig::new(store.addr().to_string())
        .with_pool(2, 2)
        .with_acquire_timeout(Duration::from_secs(10))
        .with_io_timeout(Duration::from_secs(2));
    let cache = CacheFacade::with_config(config).unwrap();

    let workers: Vec<_> = (0..6)
        .map(|worker| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    let key = format!("Worker{}:{}", worker, i);
                    cache.set(&key, "v").unwrap();
                    assert_eq!(cache.get(&key).unwrap().as_deref(), Some("v"));
                    cache.zadd("scores", (worker * 100 + i) as f64, &key).unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(cache.key_count().unwrap().count, 6 * 25 + 1);
    assert_eq!(cache.zrange_by_score("scores", "-inf", "+inf").unwrap().len(), 150);

    let status = cache.pool().status();
    assert_eq!(status.leased, 0);
    assert!(status.total <= 2);
    assert_eq!(cache.metrics().errors_total, 0);
}
