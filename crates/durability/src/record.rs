//! WAL record format
//!
//! Records are self-delimiting so a crash mid-append leaves a detectable
//! torn tail:
//!
//! ```text
//! ┌──────────────┬─────────────────────────────┬──────────────┐
//! │ Length (4 LE)│ Body (variable)             │ CRC32 (4 LE) │
//! └──────────────┴─────────────────────────────┴──────────────┘
//!
//! Body:
//! ┌──────────┬───────────────────┬─────────┬────────────────────┐
//! │ Seq (8)  │ Timestamp ms (8)  │ Op tag  │ Op payload         │
//! └──────────┴───────────────────┴─────────┴────────────────────┘
//! ```
//!
//! The CRC covers the body. Keys, members, and values are u32
//! length-prefixed byte strings; scores are IEEE-754 bit patterns;
//! everything is little-endian.

use crc32fast::Hasher;
use thiserror::Error;

use cachegrid_core::WalOp;

/// Op tags on the wire. Stable; never renumber.
const TAG_SET: u8 = 1;
const TAG_DEL: u8 = 2;
const TAG_EXPIRE: u8 = 3;
const TAG_EXPIRE_REMOVE: u8 = 4;
const TAG_ZADD: u8 = 5;
const TAG_ZREM: u8 = 6;
const TAG_FLUSH: u8 = 7;

/// Upper bound on a single record body. A length prefix above this is
/// treated as garbage rather than an instruction to wait for gigabytes.
const MAX_BODY_BYTES: u32 = 256 * 1024 * 1024;

/// Decode failure modes, distinguished so the reader can tell a torn tail
/// (expected after a crash) from corruption.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WalRecordError {
    /// The buffer ends before a complete record; torn tail.
    #[error("incomplete record at end of log")]
    Insufficient,
    /// The body failed its checksum.
    #[error("record checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    ChecksumMismatch {
        /// CRC stored in the record
        expected: u32,
        /// CRC computed over the body
        actual: u32,
    },
    /// The checksum passed but the body could not be parsed.
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// One durable mutation record.
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    /// Per-node sequence number: strictly increasing, contiguous
    pub seq: u64,
    /// Wall-clock time of the append (epoch millis)
    pub timestamp_ms: u64,
    /// The logged mutation
    pub op: WalOp,
}

impl WalRecord {
    /// Create a record.
    pub fn new(seq: u64, timestamp_ms: u64, op: WalOp) -> Self {
        WalRecord {
            seq,
            timestamp_ms,
            op,
        }
    }

    /// Encode as a framed record (`len | body | crc`).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(32);
        body.extend_from_slice(&self.seq.to_le_bytes());
        body.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        encode_op(&self.op, &mut body);

        let mut hasher = Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        let mut out = Vec::with_capacity(body.len() + 8);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Decode one record from the front of `buf`.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn from_bytes(buf: &[u8]) -> Result<(WalRecord, usize), WalRecordError> {
        if buf.len() < 4 {
            return Err(WalRecordError::Insufficient);
        }
        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if len > MAX_BODY_BYTES {
            return Err(WalRecordError::Malformed(format!(
                "record length {len} exceeds cap"
            )));
        }
        let total = 4 + len as usize + 4;
        if buf.len() < total {
            return Err(WalRecordError::Insufficient);
        }
        let body = &buf[4..4 + len as usize];
        let stored_crc = u32::from_le_bytes([
            buf[total - 4],
            buf[total - 3],
            buf[total - 2],
            buf[total - 1],
        ]);
        let mut hasher = Hasher::new();
        hasher.update(body);
        let actual_crc = hasher.finalize();
        if actual_crc != stored_crc {
            return Err(WalRecordError::ChecksumMismatch {
                expected: stored_crc,
                actual: actual_crc,
            });
        }

        let mut cursor = Cursor { buf: body, pos: 0 };
        let seq = cursor.read_u64()?;
        let timestamp_ms = cursor.read_u64()?;
        let op = decode_op(&mut cursor)?;
        if cursor.pos != body.len() {
            return Err(WalRecordError::Malformed(format!(
                "{} trailing bytes after op payload",
                body.len() - cursor.pos
            )));
        }

        Ok((
            WalRecord {
                seq,
                timestamp_ms,
                op,
            },
            total,
        ))
    }
}

fn encode_op(op: &WalOp, out: &mut Vec<u8>) {
    match op {
        WalOp::Set {
            key,
            value,
            expires_at_ms,
        } => {
            out.push(TAG_SET);
            encode_bytes(key, out);
            match expires_at_ms {
                Some(at) => {
                    out.push(1);
                    out.extend_from_slice(&at.to_le_bytes());
                }
                None => out.push(0),
            }
            encode_bytes(value, out);
        }
        WalOp::Del { key } => {
            out.push(TAG_DEL);
            encode_bytes(key, out);
        }
        WalOp::Expire {
            key,
            expires_at_ms,
        } => {
            out.push(TAG_EXPIRE);
            encode_bytes(key, out);
            out.extend_from_slice(&expires_at_ms.to_le_bytes());
        }
        WalOp::ExpireRemove { key } => {
            out.push(TAG_EXPIRE_REMOVE);
            encode_bytes(key, out);
        }
        WalOp::ZAdd { key, member, score } => {
            out.push(TAG_ZADD);
            encode_bytes(key, out);
            encode_bytes(member, out);
            out.extend_from_slice(&score.to_bits().to_le_bytes());
        }
        WalOp::ZRem { key, member } => {
            out.push(TAG_ZREM);
            encode_bytes(key, out);
            encode_bytes(member, out);
        }
        WalOp::Flush => out.push(TAG_FLUSH),
    }
}

fn decode_op(cursor: &mut Cursor<'_>) -> Result<WalOp, WalRecordError> {
    let tag = cursor.read_u8()?;
    match tag {
        TAG_SET => {
            let key = cursor.read_bytes()?;
            let expires_at_ms = match cursor.read_u8()? {
                0 => None,
                1 => Some(cursor.read_u64()?),
                flag => {
                    return Err(WalRecordError::Malformed(format!(
                        "invalid expiry flag {flag}"
                    )))
                }
            };
            let value = cursor.read_bytes()?;
            Ok(WalOp::Set {
                key,
                value,
                expires_at_ms,
            })
        }
        TAG_DEL => Ok(WalOp::Del {
            key: cursor.read_bytes()?,
        }),
        TAG_EXPIRE => Ok(WalOp::Expire {
            key: cursor.read_bytes()?,
            expires_at_ms: cursor.read_u64()?,
        }),
        TAG_EXPIRE_REMOVE => Ok(WalOp::ExpireRemove {
            key: cursor.read_bytes()?,
        }),
        TAG_ZADD => Ok(WalOp::ZAdd {
            key: cursor.read_bytes()?,
            member: cursor.read_bytes()?,
            score: f64::from_bits(cursor.read_u64()?),
        }),
        TAG_ZREM => Ok(WalOp::ZRem {
            key: cursor.read_bytes()?,
            member: cursor.read_bytes()?,
        }),
        TAG_FLUSH => Ok(WalOp::Flush),
        other => Err(WalRecordError::Malformed(format!("unknown op tag {other}"))),
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn read_u8(&mut self) -> Result<u8, WalRecordError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| WalRecordError::Malformed("body truncated".to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u64(&mut self) -> Result<u64, WalRecordError> {
        let end = self.pos + 8;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| WalRecordError::Malformed("body truncated".to_string()))?;
        self.pos = end;
        Ok(u64::from_le_bytes(slice.try_into().expect("8-byte slice")))
    }

    fn read_u32(&mut self) -> Result<u32, WalRecordError> {
        let end = self.pos + 4;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| WalRecordError::Malformed("body truncated".to_string()))?;
        self.pos = end;
        Ok(u32::from_le_bytes(slice.try_into().expect("4-byte slice")))
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, WalRecordError> {
        let len = self.read_u32()? as usize;
        let end = self.pos + len;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| WalRecordError::Malformed("byte string truncated".to_string()))?;
        self.pos = end;
        Ok(slice.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ops() -> Vec<WalOp> {
        vec![
            WalOp::Set {
                key: b"user:1".to_vec(),
                value: b"Alice".to_vec(),
                expires_at_ms: None,
            },
            WalOp::Set {
                key: b"session".to_vec(),
                value: b"tok".to_vec(),
                expires_at_ms: Some(1_700_000_000_000),
            },
            WalOp::Del {
                key: b"user:1".to_vec(),
            },
            WalOp::Expire {
                key: b"session".to_vec(),
                expires_at_ms: 42,
            },
            WalOp::ExpireRemove {
                key: b"session".to_vec(),
            },
            WalOp::ZAdd {
                key: b"lb".to_vec(),
                member: b"p1".to_vec(),
                score: -85.5,
            },
            WalOp::ZRem {
                key: b"lb".to_vec(),
                member: b"p1".to_vec(),
            },
            WalOp::Flush,
        ]
    }

    #[test]
    fn every_op_round_trips() {
        for (i, op) in sample_ops().into_iter().enumerate() {
            let record = WalRecord::new(i as u64 + 1, 123_456, op);
            let bytes = record.to_bytes();
            let (decoded, consumed) = WalRecord::from_bytes(&bytes).unwrap();
            assert_eq!(consumed, bytes.len());
            assert_eq!(decoded, record);
        }
    }

    #[test]
    fn decodes_from_a_stream() {
        let mut stream = Vec::new();
        let records: Vec<WalRecord> = sample_ops()
            .into_iter()
            .enumerate()
            .map(|(i, op)| WalRecord::new(i as u64 + 1, 99, op))
            .collect();
        for r in &records {
            stream.extend_from_slice(&r.to_bytes());
        }

        let mut offset = 0;
        let mut decoded = Vec::new();
        while offset < stream.len() {
            let (r, used) = WalRecord::from_bytes(&stream[offset..]).unwrap();
            decoded.push(r);
            offset += used;
        }
        assert_eq!(decoded, records);
    }

    #[test]
    fn truncated_frame_is_insufficient() {
        let record = WalRecord::new(
            1,
            0,
            WalOp::Set {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
                expires_at_ms: None,
            },
        );
        let bytes = record.to_bytes();
        for cut in 0..bytes.len() {
            let err = WalRecord::from_bytes(&bytes[..cut]).unwrap_err();
            assert_eq!(err, WalRecordError::Insufficient, "cut at {cut}");
        }
    }

    #[test]
    fn flipped_bit_is_checksum_mismatch() {
        let record = WalRecord::new(7, 0, WalOp::Del { key: b"k".to_vec() });
        let mut bytes = record.to_bytes();
        bytes[6] ^= 0x40;
        assert!(matches!(
            WalRecord::from_bytes(&bytes),
            Err(WalRecordError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn absurd_length_is_malformed() {
        let mut bytes = (u32::MAX).to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            WalRecord::from_bytes(&bytes),
            Err(WalRecordError::Malformed(_))
        ));
    }

    #[test]
    fn score_bit_pattern_survives() {
        for score in [0.0, -0.0, 1.5, -85.5, f64::MIN_POSITIVE] {
            let record = WalRecord::new(
                1,
                0,
                WalOp::ZAdd {
                    key: b"z".to_vec(),
                    member: b"m".to_vec(),
                    score,
                },
            );
            let (decoded, _) = WalRecord::from_bytes(&record.to_bytes()).unwrap();
            match decoded.op {
                WalOp::ZAdd { score: s, .. } => assert_eq!(s.to_bits(), score.to_bits()),
                _ => panic!("wrong op"),
            }
        }
    }
}
