//! # TCP Server
//!
//! Accept RESP2 connections, parse commands, and dispatch them to the
//! in-memory store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::engine::{parse_score, MemoryStore, ScoreBound, TtlStatus};
use crate::protocol::{Reply, RespError, RespParser};

/// How often the background sweep drops expired keys.
pub const EXPIRE_INTERVAL: Duration = Duration::from_millis(100);

/// Accepts connections forever, one task per client.
pub async fn serve(listener: TcpListener, store: Arc<MemoryStore>) -> std::io::Result<()> {
    tokio::spawn(expire_loop(Arc::clone(&store), EXPIRE_INTERVAL));

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "client connected");
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, store).await {
                warn!(%peer, error = %err, "client connection failed");
            }
            debug!(%peer, "client disconnected");
        });
    }
}

async fn expire_loop(store: Arc<MemoryStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let purged = store.purge_expired(Instant::now());
        if purged > 0 {
            debug!(purged, "expired keys purged");
        }
    }
}

/// Handles a single TCP client connection.
pub async fn handle_connection(mut stream: TcpStream, store: Arc<MemoryStore>) -> std::io::Result<()> {
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut out = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();

    loop {
        if stream.read_buf(&mut buffer).await? == 0 {
            break;
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(args)) => dispatch(&args, &store).encode_into(&mut out),
                Ok(None) => break,
                Err(RespError::Protocol) => {
                    Reply::error("ERR protocol error").encode_into(&mut out);
                    stream.write_all(&out).await?;
                    return Ok(());
                }
            }
        }

        if !out.is_empty() {
            stream.write_all(&out).await?;
            out.clear();
        }
    }

    Ok(())
}

/// Runs one command against the store.
pub fn dispatch(args: &[Vec<u8>], store: &MemoryStore) -> Reply {
    let Some(cmd) = args.first() else {
        return Reply::error("ERR empty command");
    };

    match cmd.to_ascii_uppercase().as_slice() {
        b"PING" => handle_ping(args),
        b"INFO" => Reply::Bulk(store.info().into_bytes()),
        b"DBSIZE" => Reply::Integer(store.dbsize() as i64),
        b"KEYS" => handle_keys(args, store),
        b"GET" => handle_get(args, store),
        b"SET" => handle_set(args, store),
        b"DEL" => handle_del(args, store),
        b"EXISTS" => handle_exists(args, store),
        b"PTTL" => handle_pttl(args, store),
        b"PEXPIRE" => handle_pexpire(args, store),
        b"ZADD" => handle_zadd(args, store),
        b"ZRANGEBYSCORE" => handle_zrange_by_score(args, store),
        b"ZREMRANGEBYSCORE" => handle_zremrange_by_score(args, store),
        b"ZREM" => handle_zrem(args, store),
        _ => Reply::error(format!(
            "ERR unknown command '{}'",
            String::from_utf8_lossy(cmd)
        )),
    }
}

fn arity_error(name: &str) -> Reply {
    Reply::error(format!("ERR wrong number of arguments for '{}' command", name))
}

fn handle_ping(args: &[Vec<u8>]) -> Reply {
    match args.len() {
        1 => Reply::Simple("PONG"),
        2 => Reply::Bulk(args[1].clone()),
        _ => arity_error("ping"),
    }
}

fn handle_keys(args: &[Vec<u8>], store: &MemoryStore) -> Reply {
    if args.len() != 2 {
        return arity_error("keys");
    }
    Reply::Array(store.keys(&args[1]))
}

fn handle_get(args: &[Vec<u8>], store: &MemoryStore) -> Reply {
    if args.len() != 2 {
        return arity_error("get");
    }
    match store.get(&args[1]) {
        Ok(Some(value)) => Reply::Bulk(value),
        Ok(None) => Reply::Nil,
        Err(err) => Reply::error(err.to_string()),
    }
}

fn handle_set(args: &[Vec<u8>], store: &MemoryStore) -> Reply {
    let ttl = match args.len() {
        3 => None,
        5 => {
            let amount = match parse_u64(&args[4]) {
                Ok(value) if value > 0 => value,
                _ => return Reply::error("ERR invalid expire time in 'set' command"),
            };
            match args[3].to_ascii_uppercase().as_slice() {
                b"EX" => Some(Duration::from_secs(amount)),
                b"PX" => Some(Duration::from_millis(amount)),
                _ => return Reply::error("ERR syntax error"),
            }
        }
        _ => return arity_error("set"),
    };

    store.set(args[1].clone(), args[2].clone(), ttl);
    Reply::Simple("OK")
}

fn handle_del(args: &[Vec<u8>], store: &MemoryStore) -> Reply {
    if args.len() < 2 {
        return arity_error("del");
    }
    let removed = args[1..].iter().filter(|key| store.delete(key)).count();
    Reply::Integer(removed as i64)
}

fn handle_exists(args: &[Vec<u8>], store: &MemoryStore) -> Reply {
    if args.len() < 2 {
        return arity_error("exists");
    }
    let found = args[1..].iter().filter(|key| store.exists(key)).count();
    Reply::Integer(found as i64)
}

fn handle_pttl(args: &[Vec<u8>], store: &MemoryStore) -> Reply {
    if args.len() != 2 {
        return arity_error("pttl");
    }
    match store.ttl(&args[1]) {
        TtlStatus::Missing => Reply::Integer(-2),
        TtlStatus::NoExpiry => Reply::Integer(-1),
        TtlStatus::ExpiresIn(remaining) => Reply::Integer(remaining.as_millis() as i64),
    }
}

fn handle_pexpire(args: &[Vec<u8>], store: &MemoryStore) -> Reply {
    if args.len() != 3 {
        return arity_error("pexpire");
    }
    let millis = match parse_u64(&args[2]) {
        Ok(value) => value,
        Err(reply) => return reply,
    };
    Reply::Integer(store.expire(&args[1], Duration::from_millis(millis)) as i64)
}

fn handle_zadd(args: &[Vec<u8>], store: &MemoryStore) -> Reply {
    if args.len() < 4 || args.len() % 2 != 0 {
        return arity_error("zadd");
    }

    let mut pairs = Vec::with_capacity((args.len() - 2) / 2);
    for pair in args[2..].chunks(2) {
        match parse_score(&pair[0]) {
            Some(score) => pairs.push((score, pair[1].clone())),
            None => return Reply::error("ERR value is not a valid float"),
        }
    }

    let mut added = 0i64;
    for (score, member) in pairs {
        match store.zadd(&args[1], score, member) {
            Ok(true) => added += 1,
            Ok(false) => {}
            Err(err) => return Reply::error(err.to_string()),
        }
    }
    Reply::Integer(added)
}

fn parse_range(args: &[Vec<u8>]) -> Result<(ScoreBound, ScoreBound), Reply> {
    match (ScoreBound::parse(&args[2]), ScoreBound::parse(&args[3])) {
        (Some(min), Some(max)) => Ok((min, max)),
        _ => Err(Reply::error("ERR min or max is not a float")),
    }
}

fn handle_zrange_by_score(args: &[Vec<u8>], store: &MemoryStore) -> Reply {
    if args.len() != 4 {
        return arity_error("zrangebyscore");
    }
    let (min, max) = match parse_range(args) {
        Ok(range) => range,
        Err(reply) => return reply,
    };
    match store.zrange_by_score(&args[1], min, max) {
        Ok(members) => Reply::Array(members),
        Err(err) => Reply::error(err.to_string()),
    }
}

fn handle_zremrange_by_score(args: &[Vec<u8>], store: &MemoryStore) -> Reply {
    if args.len() != 4 {
        return arity_error("zremrangebyscore");
    }
    let (min, max) = match parse_range(args) {
        Ok(range) => range,
        Err(reply) => return reply,
    };
    match store.zremrange_by_score(&args[1], min, max) {
        Ok(removed) => Reply::Integer(removed as i64),
        Err(err) => Reply::error(err.to_string()),
    }
}

fn handle_zrem(args: &[Vec<u8>], store: &MemoryStore) -> Reply {
    if args.len() < 3 {
        return arity_error("zrem");
    }
    match store.zrem(&args[1], &args[2..]) {
        Ok(removed) => Reply::Integer(removed as i64),
        Err(err) => Reply::error(err.to_string()),
    }
}

fn parse_u64(arg: &[u8]) -> Result<u64, Reply> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| Reply::error("ERR value is not an integer or out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|part| part.as_bytes().to_vec()).collect()
    }

    #[test]
    fn dispatches_string_commands() {
        let store = MemoryStore::new();
        assert_eq!(dispatch(&cmd(&["set", "k", "v"]), &store), Reply::Simple("OK"));
        assert_eq!(dispatch(&cmd(&["GET", "k"]), &store), Reply::Bulk(b"v".to_vec()));
        assert_eq!(dispatch(&cmd(&["PTTL", "k"]), &store), Reply::Integer(-1));
        assert_eq!(dispatch(&cmd(&["PEXPIRE", "k", "5000"]), &store), Reply::Integer(1));
        assert_eq!(dispatch(&cmd(&["PEXPIRE", "nope", "5000"]), &store), Reply::Integer(0));
        assert_eq!(dispatch(&cmd(&["EXISTS", "k", "nope"]), &store), Reply::Integer(1));
        assert_eq!(dispatch(&cmd(&["DEL", "k", "nope"]), &store), Reply::Integer(1));
        assert_eq!(dispatch(&cmd(&["GET", "k"]), &store), Reply::Nil);
        assert_eq!(dispatch(&cmd(&["PTTL", "k"]), &store), Reply::Integer(-2));
    }

    #[test]
    fn dispatches_sorted_set_commands() {
        let store = MemoryStore::new();
        assert_eq!(dispatch(&cmd(&["ZADD", "z", "1", "a", "2", "b"]), &store), Reply::Integer(2));
        assert_eq!(
            dispatch(&cmd(&["ZRANGEBYSCORE", "z", "-inf", "+inf"]), &store),
            Reply::Array(vec![b"a".to_vec(), b"b".to_vec()])
        );
        assert_eq!(dispatch(&cmd(&["ZREM", "z", "a"]), &store), Reply::Integer(1));
        assert_eq!(dispatch(&cmd(&["ZREMRANGEBYSCORE", "z", "0", "(2"]), &store), Reply::Integer(0));
        assert_eq!(dispatch(&cmd(&["DBSIZE"]), &store), Reply::Integer(1));
    }

    #[test]
    fn reports_errors_as_replies() {
        let store = MemoryStore::new();
        assert!(matches!(dispatch(&cmd(&["ZADD", "z", "x", "a"]), &store), Reply::Error(_)));
        assert!(matches!(dispatch(&cmd(&["GET"]), &store), Reply::Error(_)));
        assert!(matches!(dispatch(&cmd(&["FLUSHALL"]), &store), Reply::Error(_)));

        dispatch(&cmd(&["SET", "s", "v"]), &store);
        match dispatch(&cmd(&["ZADD", "s", "1", "a"]), &store) {
            Reply::Error(message) => assert!(message.starts_with("WRONGTYPE")),
            other => panic!("unexpected reply {:?}", other),
        }
    }
}
