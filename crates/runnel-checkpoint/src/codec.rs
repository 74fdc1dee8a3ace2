//! Binary encode/decode for the checkpoint format.
//!
//! Primitives come from `runnel_core::codec`; this module adds the file
//! header and the frame envelope. Strings are length-prefixed with a `u32`
//! length. Each frame carries its snapshot as a length-prefixed blob so a
//! reader can tell a clean end of file from a truncated frame.

use std::io::{Read, Write};

use runnel_core::codec::{
    from_bytes, read_f64_le, read_u32_le, read_u64_le, read_u8, to_bytes, write_f64_le, write_len,
    write_u32_le, write_u64_le, write_u8,
};
use runnel_element::RegionSnapshot;

use crate::error::CheckpointError;
use crate::types::{CheckpointHeader, Frame};
use crate::{FORMAT_VERSION, MAGIC};

// ── Strings ─────────────────────────────────────────────────────

/// Write a length-prefixed UTF-8 string (u32 length + bytes).
pub fn write_length_prefixed_str(w: &mut dyn Write, s: &str) -> Result<(), CheckpointError> {
    write_len(w, s.len())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

/// Read a length-prefixed UTF-8 string.
pub fn read_length_prefixed_str(r: &mut dyn Read) -> Result<String, CheckpointError> {
    let bytes = read_length_prefixed_bytes(r)?;
    String::from_utf8(bytes).map_err(|e| CheckpointError::MalformedFrame {
        detail: format!("invalid UTF-8 string: {e}"),
    })
}

/// Read a length-prefixed byte array.
pub fn read_length_prefixed_bytes(r: &mut dyn Read) -> Result<Vec<u8>, CheckpointError> {
    let len = read_u32_le(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

// ── Header encode/decode ────────────────────────────────────────

/// Encode the file header (magic, version, run description).
pub fn encode_header(w: &mut dyn Write, header: &CheckpointHeader) -> Result<(), CheckpointError> {
    w.write_all(&MAGIC)?;
    write_u8(w, FORMAT_VERSION)?;
    write_length_prefixed_str(w, &header.runnel_version)?;
    write_u64_le(w, header.config_hash)?;
    write_f64_le(w, header.simulation_start)?;
    write_f64_le(w, header.simulation_end)?;
    write_f64_le(w, header.sync_interval)?;
    write_u32_le(w, header.region_count)?;
    Ok(())
}

/// Decode and validate the file header.
pub fn decode_header(r: &mut dyn Read) -> Result<CheckpointHeader, CheckpointError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(CheckpointError::InvalidMagic);
    }
    let version = read_u8(r)?;
    if version != FORMAT_VERSION {
        return Err(CheckpointError::UnsupportedVersion { found: version });
    }
    Ok(CheckpointHeader {
        runnel_version: read_length_prefixed_str(r)?,
        config_hash: read_u64_le(r)?,
        simulation_start: read_f64_le(r)?,
        simulation_end: read_f64_le(r)?,
        sync_interval: read_f64_le(r)?,
        region_count: read_u32_le(r)?,
    })
}

// ── Frame encode/decode ─────────────────────────────────────────

/// Encode one frame: hash, then the length-prefixed snapshot.
pub fn encode_frame(w: &mut dyn Write, frame: &Frame) -> Result<(), CheckpointError> {
    let body = to_bytes(&frame.snapshot)?;
    write_u64_le(w, frame.snapshot_hash)?;
    write_len(w, body.len())?;
    w.write_all(&body)?;
    Ok(())
}

/// Decode the next frame, or `None` at a clean end of stream.
///
/// The stored hash is returned as read; [`CheckpointReader`] checks it.
///
/// [`CheckpointReader`]: crate::CheckpointReader
pub fn decode_frame(r: &mut dyn Read) -> Result<Option<Frame>, CheckpointError> {
    // Read the hash byte-by-byte to distinguish clean EOF (zero bytes
    // available) from truncation (1-7 bytes before EOF).
    let mut hash_buf = [0u8; 8];
    let mut filled = 0;
    while filled < 8 {
        match r.read(&mut hash_buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(CheckpointError::MalformedFrame {
                    detail: format!("truncated frame header: got {filled} of 8 hash bytes"),
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CheckpointError::Io(e)),
        }
    }
    let snapshot_hash = u64::from_le_bytes(hash_buf);
    let body = read_length_prefixed_bytes(r).map_err(|e| match e {
        CheckpointError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            CheckpointError::MalformedFrame {
                detail: "truncated snapshot body".to_string(),
            }
        }
        other => other,
    })?;
    let snapshot: RegionSnapshot = from_bytes(&body)?;
    Ok(Some(Frame {
        snapshot_hash,
        snapshot,
    }))
}
