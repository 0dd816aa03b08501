//! Checksummed framing for log entries.
//!
//! File layout:
//! ```text
//! [magic: 4 bytes "TXCG"][version: 1 byte]
//! [frame]*
//! frame := [length: u32 LE][crc32: u32 LE][payload: length bytes JSON]
//! ```

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current file format version.
pub const FORMAT_VERSION: u8 = 1;

/// Magic bytes identifying a taxocat log file.
pub const MAGIC: [u8; 4] = *b"TXCG";

/// Header length in bytes.
pub const HEADER_LEN: u64 = 5;

const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Serialize `value` into one frame.
pub fn encode_frame<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| IoError::new(ErrorKind::InvalidData, "frame payload too large"))?;

    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&checksum(&payload).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Read one frame, verifying its checksum.
///
/// A clean end of input before the first byte of a frame yields `Ok(None)`.
/// A frame cut short yields an `UnexpectedEof` error.
pub fn decode_frame<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<Option<T>> {
    let mut head = [0u8; 8];
    let mut filled = 0;
    while filled < head.len() {
        let n = reader.read(&mut head[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(IoError::new(ErrorKind::UnexpectedEof, "truncated frame header"));
        }
        filled += n;
    }

    let len = u32::from_le_bytes([head[0], head[1], head[2], head[3]]) as usize;
    let stored_crc = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
    if len > MAX_FRAME_LEN {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("frame length {len} exceeds maximum {MAX_FRAME_LEN}"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let computed = checksum(&payload);
    if computed != stored_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored_crc:08x}, computed={computed:08x}"),
        ));
    }

    serde_json::from_slice(&payload)
        .map(Some)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

/// Write the file header.
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[FORMAT_VERSION])
}

/// Read and validate the file header.
pub fn read_header(reader: &mut impl Read) -> IoResult<()> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header)?;
    if header[..4] != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: {:?}", &header[..4]),
        ));
    }
    if header[4] != FORMAT_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported format version {} (expected {FORMAT_VERSION})", header[4]),
        ));
    }
    Ok(())
}
