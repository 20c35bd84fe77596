//! RESP (Redis Serialization Protocol) parser.
//!
//! Parses simple strings, bulk strings and arrays out of a byte buffer and
//! encodes reply frames. Parsing is a pure function over the bytes received
//! so far: the connection keeps reading until a frame is `Complete`.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Largest bulk string payload accepted from a client (512 MB)
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted from a client
pub const MAX_DEPTH: usize = 32;

/// Upper bound on elements reserved up front for an array
const MAX_PREALLOC: usize = 1024;

/// RESP frame types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string: +OK\r\n
    Simple(String),
    /// Error: -ERR message\r\n (replies only)
    Error(String),
    /// Bulk string: $5\r\nhello\r\n
    Bulk(Bytes),
    /// Null bulk string: $-1\r\n (replies only)
    Null,
    /// Array: *2\r\n...
    Array(Vec<Frame>),
}

impl Frame {
    /// Encode a frame to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encode a frame into an existing buffer
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                buf.extend_from_slice(b"+");
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Frame::Error(s) => {
                buf.extend_from_slice(b"-");
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Frame::Bulk(data) => {
                buf.extend_from_slice(b"$");
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            Frame::Null => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            Frame::Array(frames) => {
                buf.extend_from_slice(b"*");
                buf.extend_from_slice(frames.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                for frame in frames {
                    frame.encode_into(buf);
                }
            }
        }
    }

    /// Create a simple string response
    pub fn simple<S: Into<String>>(s: S) -> Frame {
        Frame::Simple(s.into())
    }

    /// Create an error response
    pub fn error<S: Into<String>>(s: S) -> Frame {
        Frame::Error(s.into())
    }

    /// Create a null bulk string response
    pub fn null() -> Frame {
        Frame::Null
    }

    /// Create a bulk string response
    pub fn bulk<B: Into<Bytes>>(data: B) -> Frame {
        Frame::Bulk(data.into())
    }

    /// Create an array
    pub fn array(frames: Vec<Frame>) -> Frame {
        Frame::Array(frames)
    }

    /// Raw payload of a string frame.
    ///
    /// Simple and bulk strings are interchangeable once decoded, so both
    /// yield their bytes. Arrays, errors and nulls carry no single payload.
    pub fn payload(&self) -> Option<Bytes> {
        match self {
            Frame::Simple(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            Frame::Bulk(data) => Some(data.clone()),
            Frame::Error(_) | Frame::Null | Frame::Array(_) => None,
        }
    }
}

/// Reasons a byte stream cannot be decoded into a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid frame type byte: {0:?}")]
    InvalidType(char),

    #[error("invalid length: {0:?}")]
    InvalidLength(String),

    #[error("bulk string of {0} bytes exceeds limit")]
    BulkTooLarge(usize),

    #[error("invalid UTF-8 in simple string")]
    InvalidUtf8,

    #[error("expected '\\n' after '\\r'")]
    MissingLineFeed,

    #[error("bulk string missing trailing CRLF")]
    MissingTrailer,

    #[error("arrays nested too deeply")]
    TooDeep,

    #[error("stream ended in the middle of a frame")]
    Truncated,
}

/// Parse result
#[derive(Debug)]
pub enum ParseResult {
    /// Successfully parsed a frame with bytes consumed
    Complete(Frame, usize),
    /// Need more data
    Incomplete,
    /// Parse error
    Error(ProtocolError),
}

/// Parse a RESP frame from a buffer
pub fn parse(buffer: &[u8]) -> ParseResult {
    parse_at_depth(buffer, 0)
}

fn parse_at_depth(buffer: &[u8], depth: usize) -> ParseResult {
    if buffer.is_empty() {
        return ParseResult::Incomplete;
    }

    match buffer[0] {
        b'+' => parse_simple_string(buffer),
        b'$' => parse_bulk_string(buffer),
        b'*' => parse_array(buffer, depth),
        other => ParseResult::Error(ProtocolError::InvalidType(char::from(other))),
    }
}

/// Locate the line terminator starting at `from`.
///
/// Scanning stops at the first `\r`; the byte after it must be `\n`.
/// Returns the position of the `\r`.
fn find_crlf(buffer: &[u8], from: usize) -> Result<Option<usize>, ProtocolError> {
    let Some(cr) = buffer[from..].iter().position(|&b| b == b'\r') else {
        return Ok(None);
    };
    let cr = from + cr;
    match buffer.get(cr + 1) {
        None => Ok(None),
        Some(b'\n') => Ok(Some(cr)),
        Some(_) => Err(ProtocolError::MissingLineFeed),
    }
}

/// Parse the decimal length following a `$` or `*` prefix.
///
/// Returns the length and the offset of the first byte after its CRLF.
fn parse_length(buffer: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
    let Some(end) = find_crlf(buffer, 1)? else {
        return Ok(None);
    };
    let raw = &buffer[1..end];
    let len = std::str::from_utf8(raw)
        .ok()
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| ProtocolError::InvalidLength(String::from_utf8_lossy(raw).into_owned()))?;
    Ok(Some((len, end + 2)))
}

/// Parse a simple string: +OK\r\n
fn parse_simple_string(buffer: &[u8]) -> ParseResult {
    match find_crlf(buffer, 1) {
        Ok(Some(end)) => match std::str::from_utf8(&buffer[1..end]) {
            Ok(s) => ParseResult::Complete(Frame::Simple(s.to_string()), end + 2),
            Err(_) => ParseResult::Error(ProtocolError::InvalidUtf8),
        },
        Ok(None) => ParseResult::Incomplete,
        Err(e) => ParseResult::Error(e),
    }
}

/// Parse a bulk string: $5\r\nhello\r\n
fn parse_bulk_string(buffer: &[u8]) -> ParseResult {
    let (len, data_start) = match parse_length(buffer) {
        Ok(Some(header)) => header,
        Ok(None) => return ParseResult::Incomplete,
        Err(e) => return ParseResult::Error(e),
    };

    if len > MAX_BULK_LEN {
        return ParseResult::Error(ProtocolError::BulkTooLarge(len));
    }

    let data_end = data_start + len;
    let total_len = data_end + 2; // +2 for trailing \r\n

    if buffer.len() < total_len {
        return ParseResult::Incomplete;
    }

    if &buffer[data_end..total_len] != b"\r\n" {
        return ParseResult::Error(ProtocolError::MissingTrailer);
    }

    let data = Bytes::copy_from_slice(&buffer[data_start..data_end]);
    ParseResult::Complete(Frame::Bulk(data), total_len)
}

/// Parse an array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
fn parse_array(buffer: &[u8], depth: usize) -> ParseResult {
    if depth >= MAX_DEPTH {
        return ParseResult::Error(ProtocolError::TooDeep);
    }

    let (len, mut offset) = match parse_length(buffer) {
        Ok(Some(header)) => header,
        Ok(None) => return ParseResult::Incomplete,
        Err(e) => return ParseResult::Error(e),
    };

    let mut frames = Vec::with_capacity(len.min(MAX_PREALLOC));

    for _ in 0..len {
        match parse_at_depth(&buffer[offset..], depth + 1) {
            ParseResult::Complete(frame, consumed) => {
                frames.push(frame);
                offset += consumed;
            }
            other => return other,
        }
    }

    ParseResult::Complete(Frame::Array(frames), offset)
}
