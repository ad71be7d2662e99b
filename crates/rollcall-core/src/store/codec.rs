//! Binary container for the signature store.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic      4 bytes   "RCSG"
//! version    u16
//! dimension  u32       signature length, 0 when empty
//! count      u32
//! records    count × { id_len u32, id (UTF-8), dimension × f32 bits }
//! checksum   32 bytes  SHA-256 of everything before it
//! ```

use crate::types::{Enrollment, Signature};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;

pub const MAGIC: [u8; 4] = *b"RCSG";
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 4 + 4;
const CHECKSUM_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("file too short: {0} bytes")]
    TooShort(usize),
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("record {index} is truncated")]
    Truncated { index: usize },
    #[error("record {index} identity is not valid UTF-8")]
    InvalidIdentity { index: usize },
    #[error("duplicate identity {0:?}")]
    DuplicateIdentity(String),
    #[error("{count} records declared with zero dimension")]
    ZeroDimension { count: usize },
    #[error("{0} trailing bytes after last record")]
    TrailingBytes(usize),
}

/// Serialize entries that all have length `dimension`.
pub fn encode(dimension: usize, entries: &[Enrollment]) -> Vec<u8> {
    let body: usize = entries
        .iter()
        .map(|e| 4 + e.identity.len() + dimension * 4)
        .sum();
    let mut buf = Vec::with_capacity(HEADER_LEN + body + CHECKSUM_LEN);

    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(dimension as u32).to_le_bytes());
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());

    for entry in entries {
        buf.extend_from_slice(&(entry.identity.len() as u32).to_le_bytes());
        buf.extend_from_slice(entry.identity.as_bytes());
        for v in entry.signature.values() {
            buf.extend_from_slice(&v.to_bits().to_le_bytes());
        }
    }

    let checksum = Sha256::digest(&buf);
    buf.extend_from_slice(&checksum);
    buf
}

/// Parse a container, returning `(dimension, entries)` in stored order.
pub fn decode(bytes: &[u8]) -> Result<(usize, Vec<Enrollment>), DecodeError> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(DecodeError::TooShort(bytes.len()));
    }
    if bytes[..4] != MAGIC {
        return Err(DecodeError::BadMagic);
    }

    let (payload, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if Sha256::digest(payload).as_slice() != checksum {
        return Err(DecodeError::ChecksumMismatch);
    }

    let mut reader = Reader::new(&payload[4..]);
    // Header length was checked above.
    let version = reader.u16().ok_or(DecodeError::TooShort(bytes.len()))?;
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let dimension = reader.u32().ok_or(DecodeError::TooShort(bytes.len()))? as usize;
    let count = reader.u32().ok_or(DecodeError::TooShort(bytes.len()))? as usize;

    if count > 0 && dimension == 0 {
        return Err(DecodeError::ZeroDimension { count });
    }

    // Every record needs at least its length prefix and values.
    let min_record = dimension
        .checked_mul(4)
        .and_then(|n| n.checked_add(4))
        .ok_or(DecodeError::Truncated { index: 0 })?;
    if count > reader.remaining() / min_record {
        return Err(DecodeError::Truncated { index: 0 });
    }

    let mut seen = HashSet::with_capacity(count);
    let mut entries = Vec::with_capacity(count);

    for index in 0..count {
        let id_len = reader.u32().ok_or(DecodeError::Truncated { index })? as usize;
        let id_bytes = reader.take(id_len).ok_or(DecodeError::Truncated { index })?;
        let identity = std::str::from_utf8(id_bytes)
            .map_err(|_| DecodeError::InvalidIdentity { index })?
            .to_string();

        let raw = reader
            .take(dimension.checked_mul(4).ok_or(DecodeError::Truncated { index })?)
            .ok_or(DecodeError::Truncated { index })?;
        let values = raw
            .chunks_exact(4)
            .map(|c| f32::from_bits(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect();

        if !seen.insert(identity.clone()) {
            return Err(DecodeError::DuplicateIdentity(identity));
        }
        entries.push(Enrollment {
            identity,
            signature: Signature::new(values),
        });
    }

    if reader.remaining() > 0 {
        return Err(DecodeError::TrailingBytes(reader.remaining()));
    }

    Ok((dimension, entries))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.remaining() {
            return None;
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}
