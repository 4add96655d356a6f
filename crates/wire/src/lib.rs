//! RESP2 framing
//!
//! Requests are arrays of bulk strings; responses are simple strings,
//! errors, integers, bulk strings, null bulks, or arrays. Parsing is
//! incremental over a [`BytesMut`]: a frame that has not fully arrived
//! parses as `Ok(None)` and consumes nothing, so the caller can keep
//! reading from the socket and retry.
//!
//! Bare inline commands (`PING\r\n`) are tolerated alongside array frames
//! because health probes are frequent and some probes send the short form.

#![warn(clippy::all)]

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// The canonical health probe frame.
pub const PING_FRAME: &[u8] = b"*1\r\n$4\r\nPING\r\n";

/// The reply a healthy node sends back.
pub const PONG_REPLY: &[u8] = b"+PONG\r\n";

/// Upper bound on elements in a command array.
pub const MAX_ARRAY_LEN: usize = 1_048_576;

/// Upper bound on one bulk string.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Malformed frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// The bytes do not form a valid RESP frame
    #[error("protocol error: {0}")]
    Protocol(String),
}

fn protocol(msg: impl Into<String>) -> WireError {
    WireError::Protocol(msg.into())
}

// ============================================================================
// Request parsing
// ============================================================================

/// Try to parse one command (array of bulk strings) off the front of `buf`.
///
/// - `Ok(Some(args))`: a complete frame was consumed.
/// - `Ok(None)`: the frame is incomplete; nothing was consumed.
/// - `Err(_)`: the bytes are not a valid frame; the caller decides whether
///   the connection survives.
///
/// An inline command line (`PING\r\n`) parses as its whitespace-separated
/// words; a blank inline line parses as an empty argument list.
pub fn parse_command(buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, WireError> {
    if buf.is_empty() {
        return Ok(None);
    }

    if buf[0] != b'*' {
        // Inline command: one line, words separated by spaces.
        let Some(line_end) = find_crlf(buf, 0) else {
            return Ok(None);
        };
        let args = buf[..line_end]
            .split(|b| *b == b' ')
            .filter(|w| !w.is_empty())
            .map(|w| w.to_vec())
            .collect();
        buf.advance(line_end + 2);
        return Ok(Some(args));
    }

    let mut pos = 0usize;
    let Some(line_end) = find_crlf(buf, pos) else {
        return Ok(None);
    };
    let count = parse_int(&buf[pos + 1..line_end])?;
    if count < 0 {
        return Err(protocol("negative array length"));
    }
    let count = count as usize;
    if count > MAX_ARRAY_LEN {
        return Err(protocol("array length exceeds limit"));
    }
    pos = line_end + 2;

    let mut args = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        if pos >= buf.len() {
            return Ok(None);
        }
        if buf[pos] != b'$' {
            return Err(protocol("expected bulk string in command array"));
        }
        let Some(line_end) = find_crlf(buf, pos) else {
            return Ok(None);
        };
        let len = parse_int(&buf[pos + 1..line_end])?;
        if len < 0 {
            return Err(protocol("null bulk string in command array"));
        }
        let len = len as usize;
        if len > MAX_BULK_LEN {
            return Err(protocol("bulk string exceeds limit"));
        }
        let data_at = line_end + 2;
        let data_end = data_at + len;
        if buf.len() < data_end + 2 {
            return Ok(None);
        }
        if &buf[data_end..data_end + 2] != b"\r\n" {
            return Err(protocol("bulk string missing terminator"));
        }
        args.push(buf[data_at..data_end].to_vec());
        pos = data_end + 2;
    }

    buf.advance(pos);
    Ok(Some(args))
}

/// Encode a command as an array of bulk strings.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        out.extend_from_slice(arg.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

// ============================================================================
// Replies
// ============================================================================

/// One RESP2 reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+...` simple string
    Simple(String),
    /// `-...` error (the string includes the code prefix, e.g. `ERR ...`)
    Error(String),
    /// `:N` integer
    Integer(i64),
    /// `$len` bulk string
    Bulk(Vec<u8>),
    /// `$-1` null bulk
    Null,
    /// `*N` array
    Array(Vec<Reply>),
}

impl Reply {
    /// `+OK`
    pub fn ok() -> Reply {
        Reply::Simple("OK".to_string())
    }

    /// `+PONG`
    pub fn pong() -> Reply {
        Reply::Simple("PONG".to_string())
    }

    /// `-ERR <msg>`
    pub fn err(msg: impl std::fmt::Display) -> Reply {
        Reply::Error(format!("ERR {msg}"))
    }
}

/// Serialize a reply onto `out`.
pub fn encode_reply(reply: &Reply, out: &mut Vec<u8>) {
    match reply {
        Reply::Simple(s) => {
            out.push(b'+');
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Error(s) => {
            out.push(b'-');
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Integer(n) => {
            out.push(b':');
            out.extend_from_slice(n.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Bulk(data) => {
            out.push(b'$');
            out.extend_from_slice(data.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        Reply::Null => out.extend_from_slice(b"$-1\r\n"),
        Reply::Array(items) => {
            out.push(b'*');
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            for item in items {
                encode_reply(item, out);
            }
        }
    }
}

/// Try to parse one reply off the front of `buf`.
///
/// Same incompleteness contract as [`parse_command`].
pub fn parse_reply(buf: &mut BytesMut) -> Result<Option<Reply>, WireError> {
    let mut pos = 0usize;
    match parse_reply_at(buf, &mut pos)? {
        Some(reply) => {
            buf.advance(pos);
            Ok(Some(reply))
        }
        None => Ok(None),
    }
}

fn parse_reply_at(buf: &[u8], pos: &mut usize) -> Result<Option<Reply>, WireError> {
    if *pos >= buf.len() {
        return Ok(None);
    }
    let kind = buf[*pos];
    let Some(line_end) = find_crlf(buf, *pos) else {
        return Ok(None);
    };
    let line = &buf[*pos + 1..line_end];

    match kind {
        b'+' => {
            *pos = line_end + 2;
            Ok(Some(Reply::Simple(
                String::from_utf8_lossy(line).into_owned(),
            )))
        }
        b'-' => {
            *pos = line_end + 2;
            Ok(Some(Reply::Error(
                String::from_utf8_lossy(line).into_owned(),
            )))
        }
        b':' => {
            *pos = line_end + 2;
            Ok(Some(Reply::Integer(parse_int(line)?)))
        }
        b'$' => {
            let len = parse_int(line)?;
            if len < 0 {
                *pos = line_end + 2;
                return Ok(Some(Reply::Null));
            }
            let len = len as usize;
            if len > MAX_BULK_LEN {
                return Err(protocol("bulk string exceeds limit"));
            }
            let data_at = line_end + 2;
            let data_end = data_at + len;
            if buf.len() < data_end + 2 {
                return Ok(None);
            }
            if &buf[data_end..data_end + 2] != b"\r\n" {
                return Err(protocol("bulk string missing terminator"));
            }
            *pos = data_end + 2;
            Ok(Some(Reply::Bulk(buf[data_at..data_end].to_vec())))
        }
        b'*' => {
            let count = parse_int(line)?;
            if count < 0 {
                return Err(protocol("negative array length in reply"));
            }
            if count as usize > MAX_ARRAY_LEN {
                return Err(protocol("array length exceeds limit"));
            }
            let mut inner = line_end + 2;
            let mut items = Vec::with_capacity((count as usize).min(64));
            for _ in 0..count {
                match parse_reply_at(buf, &mut inner)? {
                    Some(item) => items.push(item),
                    None => return Ok(None),
                }
            }
            *pos = inner;
            Ok(Some(Reply::Array(items)))
        }
        other => Err(protocol(format!(
            "unexpected reply type byte {:?}",
            other as char
        ))),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn parse_int(data: &[u8]) -> Result<i64, WireError> {
    if data.is_empty() {
        return Err(protocol("empty integer"));
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() || digits.len() > 19 {
        return Err(protocol("invalid integer"));
    }
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(protocol("invalid integer"));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as i64))
            .ok_or_else(|| protocol("integer overflow"))?;
    }
    Ok(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(data: &[u8]) -> BytesMut {
        BytesMut::from(data)
    }

    #[test]
    fn parses_ping_frame() {
        let mut buf = bytes(PING_FRAME);
        let args = parse_command(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec![b"PING".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn parses_set_command() {
        let mut buf = bytes(b"*3\r\n$3\r\nSET\r\n$6\r\nuser:1\r\n$5\r\nAlice\r\n");
        let args = parse_command(&mut buf).unwrap().unwrap();
        assert_eq!(
            args,
            vec![b"SET".to_vec(), b"user:1".to_vec(), b"Alice".to_vec()]
        );
    }

    #[test]
    fn incomplete_frame_consumes_nothing() {
        let full = b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n";
        for cut in 1..full.len() {
            let mut buf = bytes(&full[..cut]);
            assert_eq!(parse_command(&mut buf).unwrap(), None, "cut at {cut}");
            assert_eq!(buf.len(), cut);
        }
    }

    #[test]
    fn two_frames_parse_in_sequence() {
        let mut buf = bytes(b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n");
        assert_eq!(
            parse_command(&mut buf).unwrap().unwrap(),
            vec![b"PING".to_vec()]
        );
        assert_eq!(
            parse_command(&mut buf).unwrap().unwrap(),
            vec![b"GET".to_vec(), b"k".to_vec()]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn inline_command_is_tolerated() {
        let mut buf = bytes(b"PING\r\n");
        let args = parse_command(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec![b"PING".to_vec()]);
    }

    #[test]
    fn blank_inline_line_is_empty_args() {
        let mut buf = bytes(b"\r\n");
        assert_eq!(parse_command(&mut buf).unwrap().unwrap(), Vec::<Vec<u8>>::new());
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_non_bulk_array_element() {
        let mut buf = bytes(b"*1\r\n:42\r\n");
        assert!(parse_command(&mut buf).is_err());
    }

    #[test]
    fn rejects_negative_array() {
        let mut buf = bytes(b"*-1\r\n");
        assert!(parse_command(&mut buf).is_err());
    }

    #[test]
    fn rejects_bad_bulk_terminator() {
        let mut buf = bytes(b"*1\r\n$4\r\nPINGXX");
        assert!(parse_command(&mut buf).is_err());
    }

    #[test]
    fn binary_safe_bulk_payloads() {
        let payload = [0u8, 1, 2, b'\r', b'\n', 255];
        let mut framed = Vec::new();
        encode_command(&[b"SET", b"bin", &payload], &mut framed);
        let mut buf = bytes(&framed);
        let args = parse_command(&mut buf).unwrap().unwrap();
        assert_eq!(args[2], payload.to_vec());
    }

    #[test]
    fn encode_command_matches_wire_form() {
        let mut out = Vec::new();
        encode_command(&[b"GET", b"key"], &mut out);
        assert_eq!(out, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn reply_encodings() {
        let cases: Vec<(Reply, &[u8])> = vec![
            (Reply::ok(), b"+OK\r\n"),
            (Reply::pong(), b"+PONG\r\n"),
            (Reply::err("unknown command"), b"-ERR unknown command\r\n"),
            (Reply::Integer(-2), b":-2\r\n"),
            (Reply::Bulk(b"Alice".to_vec()), b"$5\r\nAlice\r\n"),
            (Reply::Null, b"$-1\r\n"),
            (
                Reply::Array(vec![Reply::Bulk(b"p3".to_vec())]),
                b"*1\r\n$2\r\np3\r\n",
            ),
        ];
        for (reply, wire) in cases {
            let mut out = Vec::new();
            encode_reply(&reply, &mut out);
            assert_eq!(out, wire);
        }
    }

    #[test]
    fn reply_round_trips() {
        let replies = vec![
            Reply::ok(),
            Reply::Error("WRONGTYPE bad".to_string()),
            Reply::Integer(120),
            Reply::Bulk(b"85.5".to_vec()),
            Reply::Null,
            Reply::Array(vec![
                Reply::Bulk(b"a".to_vec()),
                Reply::Integer(1),
                Reply::Array(vec![Reply::Null]),
            ]),
        ];
        for reply in replies {
            let mut wire = Vec::new();
            encode_reply(&reply, &mut wire);
            let mut buf = bytes(&wire);
            let parsed = parse_reply(&mut buf).unwrap().unwrap();
            assert_eq!(parsed, reply);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn incomplete_reply_consumes_nothing() {
        let mut wire = Vec::new();
        encode_reply(
            &Reply::Array(vec![Reply::Bulk(b"abc".to_vec()), Reply::Integer(5)]),
            &mut wire,
        );
        for cut in 1..wire.len() {
            let mut buf = bytes(&wire[..cut]);
            assert_eq!(parse_reply(&mut buf).unwrap(), None, "cut at {cut}");
            assert_eq!(buf.len(), cut);
        }
    }

    #[test]
    fn integer_parsing_limits() {
        assert!(parse_int(b"123").unwrap() == 123);
        assert!(parse_int(b"-45").unwrap() == -45);
        assert!(parse_int(b"").is_err());
        assert!(parse_int(b"12a").is_err());
        assert!(parse_int(b"99999999999999999999999").is_err());
    }
}
