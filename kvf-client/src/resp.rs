//! # RESP2 Encoding and Parsing
//!
//! Purpose: Frame facade commands as RESP2 arrays and decode the store's
//! replies into `RespValue`, then narrow those into the Rust types each
//! command returns.
//!
//! ## Design Principles
//! 1. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 2. **Binary-Safe**: Bulk strings are read as raw bytes and only turned
//!    into text at the typed boundary.
//! 3. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::io::BufRead;

use crate::error::BackendError;

/// Nesting limit for array replies; the facade never needs more than one.
const MAX_DEPTH: usize = 8;
/// Largest bulk payload accepted, matching the store's own limit.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// Array capacity reserved up front; longer arrays grow as items arrive.
const MAX_PREALLOC_ITEMS: usize = 64;

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK` style status replies.
    Simple(String),
    /// `-ERR ...` replies.
    Error(String),
    /// `:123` replies.
    Integer(i64),
    /// `$...` bulk strings.
    Bulk(Vec<u8>),
    /// `*...` arrays.
    Array(Vec<RespValue>),
    /// `$-1` or `*-1`.
    Nil,
}

impl RespValue {
    /// Narrows a status reply (or a bulk string used as one).
    pub fn into_status(self, command: &'static str) -> Result<String, BackendError> {
        match self {
            RespValue::Simple(text) => Ok(text),
            RespValue::Bulk(data) => utf8(command, data),
            _ => Err(BackendError::UnexpectedResponse(command)),
        }
    }

    pub fn into_integer(self, command: &'static str) -> Result<i64, BackendError> {
        match self {
            RespValue::Integer(value) => Ok(value),
            _ => Err(BackendError::UnexpectedResponse(command)),
        }
    }

    /// Narrows a bulk reply where nil means "absent".
    pub fn into_optional_string(self, command: &'static str) -> Result<Option<String>, BackendError> {
        match self {
            RespValue::Bulk(data) => utf8(command, data).map(Some),
            RespValue::Nil => Ok(None),
            _ => Err(BackendError::UnexpectedResponse(command)),
        }
    }

    pub fn into_string(self, command: &'static str) -> Result<String, BackendError> {
        self.into_optional_string(command)?
            .ok_or(BackendError::UnexpectedResponse(command))
    }

    /// Narrows an array of bulk strings, preserving reply order.
    pub fn into_strings(self, command: &'static str) -> Result<Vec<String>, BackendError> {
        match self {
            RespValue::Array(items) => items
                .into_iter()
                .map(|item| item.into_string(command))
                .collect(),
            RespValue::Nil => Ok(Vec::new()),
            _ => Err(BackendError::UnexpectedResponse(command)),
        }
    }
}

fn utf8(command: &'static str, data: Vec<u8>) -> Result<String, BackendError> {
    String::from_utf8(data).map_err(|_| BackendError::InvalidUtf8(command))
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    push_header(out, b'*', args.len());
    for arg in args {
        push_header(out, b'$', arg.len());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> Result<RespValue, BackendError> {
    read_value(reader, line_buf, 0)
}

fn read_value<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> Result<RespValue, BackendError> {
    if depth > MAX_DEPTH {
        return Err(BackendError::Protocol);
    }

    read_line(reader, line_buf)?;
    let (&marker, rest) = line_buf.split_first().ok_or(BackendError::Protocol)?;

    match marker {
        b'+' => Ok(RespValue::Simple(String::from_utf8_lossy(rest).into_owned())),
        b'-' => Ok(RespValue::Error(String::from_utf8_lossy(rest).into_owned())),
        b':' => Ok(RespValue::Integer(parse_i64(rest)?)),
        b'$' => {
            let len = parse_i64(rest)?;
            if len < 0 {
                return Ok(RespValue::Nil);
            }
            read_bulk(reader, len as usize)
        }
        b'*' => {
            let len = parse_i64(rest)?;
            if len < 0 {
                return Ok(RespValue::Nil);
            }
            let mut items = Vec::with_capacity((len as usize).min(MAX_PREALLOC_ITEMS));
            for _ in 0..len {
                items.push(read_value(reader, line_buf, depth + 1)?);
            }
            Ok(RespValue::Array(items))
        }
        _ => Err(BackendError::Protocol),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: usize) -> Result<RespValue, BackendError> {
    if len > MAX_BULK_LEN {
        return Err(BackendError::Protocol);
    }
    // Payload plus trailing CRLF in one read.
    let mut data = vec![0u8; len + 2];
    reader.read_exact(&mut data)?;
    if !data.ends_with(b"\r\n") {
        return Err(BackendError::Protocol);
    }
    data.truncate(len);
    Ok(RespValue::Bulk(data))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<(), BackendError> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(BackendError::Protocol);
    }
    if !buf.ends_with(b"\r\n") {
        return Err(BackendError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> Result<i64, BackendError> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(BackendError::Protocol)
}

fn push_header(out: &mut Vec<u8>, marker: u8, len: usize) {
    out.push(marker);
    // Digits land reversed in a stack buffer; no heap formatting.
    let mut digits = [0u8; 20];
    let mut count = 0;
    let mut value = len;
    loop {
        digits[count] = b'0' + (value % 10) as u8;
        count += 1;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    out.extend(digits[..count].iter().rev());
    out.extend_from_slice(b"\r\n");
}
