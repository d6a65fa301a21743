//! # RESP2 Framing (server side)
//!
//! Incremental request parsing over a `BytesMut` read buffer, and reply
//! encoding into a write buffer.
//!
//! ## Design Principles
//! 1. **Resumable**: `parse` returns `Ok(None)` until a whole command has
//!    arrived and only then consumes bytes from the buffer.
//! 2. **Binary-Safe**: Arguments are raw bytes.
//! 3. **Bounded**: Oversized headers are rejected before allocating.

use bytes::{Buf, BufMut, BytesMut};

/// Upper bound on arguments per command and bytes per argument.
const MAX_ARGS: usize = 1024 * 1024;
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Request framing failed; the connection should be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespError {
    Protocol,
}

/// Parses RESP arrays of bulk strings out of a read buffer.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Pops one complete command off the front of `buf`, if present.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        match parse_command(buf)? {
            Some((args, consumed)) => {
                buf.advance(consumed);
                Ok(Some(args))
            }
            None => Ok(None),
        }
    }
}

fn parse_command(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, RespError> {
    let mut cursor = 0;
    let header = match next_line(buf, &mut cursor) {
        Some(line) => line,
        None => return Ok(None),
    };
    let count = match header.split_first() {
        Some((b'*', digits)) => parse_len(digits, MAX_ARGS)?,
        _ => return Err(RespError::Protocol),
    };

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let len = match next_line(buf, &mut cursor) {
            Some(line) => match line.split_first() {
                Some((b'$', digits)) => parse_len(digits, MAX_BULK_LEN)?,
                _ => return Err(RespError::Protocol),
            },
            None => return Ok(None),
        };

        let end = cursor + len;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(RespError::Protocol);
        }
        args.push(buf[cursor..end].to_vec());
        cursor = end + 2;
    }

    Ok(Some((args, cursor)))
}

/// Returns the next CRLF-terminated line (without CRLF) and moves `cursor`.
fn next_line<'a>(buf: &'a [u8], cursor: &mut usize) -> Option<&'a [u8]> {
    let rest = &buf[*cursor..];
    let pos = rest.windows(2).position(|pair| pair == b"\r\n")?;
    *cursor += pos + 2;
    Some(&rest[..pos])
}

fn parse_len(digits: &[u8], max: usize) -> Result<usize, RespError> {
    let len = std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or(RespError::Protocol)?;
    if len > max {
        return Err(RespError::Protocol);
    }
    Ok(len)
}

/// A reply to one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(&'static str),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Nil,
    Array(Vec<Vec<u8>>),
}

impl Reply {
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error(message.into())
    }

    pub fn encode_into(&self, out: &mut BytesMut) {
        match self {
            Reply::Simple(text) => {
                out.put_u8(b'+');
                out.put_slice(text.as_bytes());
                out.put_slice(b"\r\n");
            }
            Reply::Error(message) => {
                out.put_u8(b'-');
                out.put_slice(message.as_bytes());
                out.put_slice(b"\r\n");
            }
            Reply::Integer(value) => {
                out.put_u8(b':');
                out.put_slice(value.to_string().as_bytes());
                out.put_slice(b"\r\n");
            }
            Reply::Bulk(data) => put_bulk(out, data),
            Reply::Nil => out.put_slice(b"$-1\r\n"),
            Reply::Array(items) => {
                out.put_u8(b'*');
                out.put_slice(items.len().to_string().as_bytes());
                out.put_slice(b"\r\n");
                for item in items {
                    put_bulk(out, item);
                }
            }
        }
    }
}

fn put_bulk(out: &mut BytesMut, data: &[u8]) {
    out.put_u8(b'$');
    out.put_slice(data.len().to_string().as_bytes());
    out.put_slice(b"\r\n");
    out.put_slice(data);
    out.put_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_in_pieces() {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nke"[..]);
        assert_eq!(parser.parse(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 19);

        buf.extend_from_slice(b"y\r\n*1\r\n$4\r\nPING\r\n");
        let first = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(first, vec![b"GET".to_vec(), b"key".to_vec()]);
        let second = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(second, vec![b"PING".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_non_array_requests() {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(&b"+OK\r\n"[..]);
        assert_eq!(parser.parse(&mut buf), Err(RespError::Protocol));

        let mut buf = BytesMut::from(&b"*1\r\n$3\r\nabcXY"[..]);
        assert_eq!(parser.parse(&mut buf), Err(RespError::Protocol));
    }

    #[test]
    fn encodes_replies() {
        let mut out = BytesMut::new();
        Reply::Simple("OK").encode_into(&mut out);
        Reply::Integer(-2).encode_into(&mut out);
        Reply::Nil.encode_into(&mut out);
        Reply::Array(vec![b"a".to_vec()]).encode_into(&mut out);
        assert_eq!(&out[..], b"+OK\r\n:-2\r\n$-1\r\n*1\r\n$1\r\na\r\n");
    }
}
