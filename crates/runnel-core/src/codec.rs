//! Explicit binary encode/decode for persisted value types.
//!
//! All integers and floats are little-endian. Sequences are prefixed with
//! a `u32` length, optional values with a `u8` presence flag. There is no
//! self-describing schema and no reflection: every type that is
//! checkpointed or migrated between regions implements [`Encode`] and
//! [`Decode`] by hand, field by field.

use std::io::{Read, Write};

use crate::attributes::{ChannelShape, EdgeGeometry, NeighborAttributes};
use crate::connection::NeighborConnection;
use crate::endpoint::NeighborEndpoint;
use crate::error::CodecError;
use crate::id::{ElementId, RegionId};
use crate::transfer::WaterTransfer;

/// A type with a hand-written binary encoding.
pub trait Encode {
    /// Append the encoding of `self` to `w`.
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError>;
}

/// A type that can be rebuilt from its [`Encode`] output.
pub trait Decode: Sized {
    /// Read one value from `r`.
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError>;
}

// ── Primitive writers ───────────────────────────────────────────

/// Write a single byte.
pub fn write_u8(w: &mut dyn Write, v: u8) -> Result<(), CodecError> {
    w.write_all(&[v])?;
    Ok(())
}

/// Write a little-endian u32.
pub fn write_u32_le(w: &mut dyn Write, v: u32) -> Result<(), CodecError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a little-endian u64.
pub fn write_u64_le(w: &mut dyn Write, v: u64) -> Result<(), CodecError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a little-endian f64.
pub fn write_f64_le(w: &mut dyn Write, v: f64) -> Result<(), CodecError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a sequence length, rejecting lengths that do not fit in a u32.
pub fn write_len(w: &mut dyn Write, len: usize) -> Result<(), CodecError> {
    let len = u32::try_from(len).map_err(|_| CodecError::Malformed {
        detail: format!("sequence length {len} exceeds u32::MAX"),
    })?;
    write_u32_le(w, len)
}

// ── Primitive readers ───────────────────────────────────────────

/// Read a single byte.
pub fn read_u8(r: &mut dyn Read) -> Result<u8, CodecError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Read a little-endian u32.
pub fn read_u32_le(r: &mut dyn Read) -> Result<u32, CodecError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read a little-endian u64.
pub fn read_u64_le(r: &mut dyn Read) -> Result<u64, CodecError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read a little-endian f64.
pub fn read_f64_le(r: &mut dyn Read) -> Result<f64, CodecError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

/// Read a boolean encoded as a single `0`/`1` byte.
pub fn read_bool(r: &mut dyn Read) -> Result<bool, CodecError> {
    match read_u8(r)? {
        0 => Ok(false),
        1 => Ok(true),
        tag => Err(CodecError::UnknownTag { what: "bool", tag }),
    }
}

// ── Blanket impls ───────────────────────────────────────────────

impl Encode for f64 {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_f64_le(w, *self)
    }
}

impl Decode for f64 {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        read_f64_le(r)
    }
}

impl Encode for u32 {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_u32_le(w, *self)
    }
}

impl Decode for u32 {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        read_u32_le(r)
    }
}

impl Encode for bool {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_u8(w, u8::from(*self))
    }
}

impl Decode for bool {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        read_bool(r)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        match self {
            Some(v) => {
                write_u8(w, 1)?;
                v.encode(w)
            }
            None => write_u8(w, 0),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        if read_bool(r)? {
            Ok(Some(T::decode(r)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_len(w, self.len())?;
        for item in self {
            item.encode(w)?;
        }
        Ok(())
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        let len = read_u32_le(r)? as usize;
        // Cap the preallocation; a corrupt length must not trigger a huge alloc.
        let mut out = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            out.push(T::decode(r)?);
        }
        Ok(out)
    }
}

// ── Core value types ────────────────────────────────────────────

impl Encode for ElementId {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_u32_le(w, self.0)
    }
}

impl Decode for ElementId {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(ElementId(read_u32_le(r)?))
    }
}

impl Encode for RegionId {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_u32_le(w, self.0)
    }
}

impl Decode for RegionId {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(RegionId(read_u32_le(r)?))
    }
}

impl Encode for NeighborEndpoint {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_u8(w, self.tag())
    }
}

impl Decode for NeighborEndpoint {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        let tag = read_u8(r)?;
        NeighborEndpoint::from_tag(tag).ok_or(CodecError::UnknownTag {
            what: "endpoint",
            tag,
        })
    }
}

impl Encode for NeighborConnection {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        self.local_endpoint.encode(w)?;
        self.local_element.encode(w)?;
        self.remote_endpoint.encode(w)?;
        self.remote_element.encode(w)
    }
}

impl Decode for NeighborConnection {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        let local_endpoint = NeighborEndpoint::decode(r)?;
        let local_element = ElementId::decode(r)?;
        let remote_endpoint = NeighborEndpoint::decode(r)?;
        let remote_element = ElementId::decode(r)?;
        NeighborConnection::new(local_endpoint, local_element, remote_endpoint, remote_element)
            .map_err(|e| CodecError::Malformed {
                detail: format!("invalid connection: {e}"),
            })
    }
}

impl Encode for ChannelShape {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_f64_le(w, self.base_width)?;
        write_f64_le(w, self.side_slope)?;
        write_f64_le(w, self.bank_full_depth)
    }
}

impl Decode for ChannelShape {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(ChannelShape {
            base_width: read_f64_le(r)?,
            side_slope: read_f64_le(r)?,
            bank_full_depth: read_f64_le(r)?,
        })
    }
}

impl Encode for NeighborAttributes {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_f64_le(w, self.x)?;
        write_f64_le(w, self.y)?;
        write_f64_le(w, self.z_top)?;
        write_f64_le(w, self.z_bottom)?;
        write_f64_le(w, self.area_or_length)?;
        write_f64_le(w, self.manning_n)?;
        write_f64_le(w, self.conductivity)?;
        write_f64_le(w, self.porosity_or_bed_thickness)?;
        self.channel_shape.encode(w)
    }
}

impl Decode for NeighborAttributes {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(NeighborAttributes {
            x: read_f64_le(r)?,
            y: read_f64_le(r)?,
            z_top: read_f64_le(r)?,
            z_bottom: read_f64_le(r)?,
            area_or_length: read_f64_le(r)?,
            manning_n: read_f64_le(r)?,
            conductivity: read_f64_le(r)?,
            porosity_or_bed_thickness: read_f64_le(r)?,
            channel_shape: Option::<ChannelShape>::decode(r)?,
        })
    }
}

impl Encode for EdgeGeometry {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_f64_le(w, self.length)?;
        write_f64_le(w, self.normal_x)?;
        write_f64_le(w, self.normal_y)?;
        write_f64_le(w, self.z_offset)
    }
}

impl Decode for EdgeGeometry {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(EdgeGeometry {
            length: read_f64_le(r)?,
            normal_x: read_f64_le(r)?,
            normal_y: read_f64_le(r)?,
            z_offset: read_f64_le(r)?,
        })
    }
}

impl Encode for WaterTransfer {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_f64_le(w, self.amount)?;
        write_f64_le(w, self.start_time)?;
        write_f64_le(w, self.end_time)
    }
}

impl Decode for WaterTransfer {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        let amount = read_f64_le(r)?;
        let start_time = read_f64_le(r)?;
        let end_time = read_f64_le(r)?;
        WaterTransfer::new(amount, start_time, end_time)
            .map_err(|detail| CodecError::Malformed { detail })
    }
}

/// Encode `value` into a fresh byte vector.
pub fn to_bytes<T: Encode + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    value.encode(&mut buf)?;
    Ok(buf)
}

/// Decode one value from `bytes`, rejecting trailing data.
pub fn from_bytes<T: Decode>(bytes: &[u8]) -> Result<T, CodecError> {
    let mut cursor = bytes;
    let value = T::decode(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(CodecError::Malformed {
            detail: format!("{} trailing bytes", cursor.len()),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_survives_codec() {
        let c = NeighborConnection::new(
            NeighborEndpoint::MeshAquifer,
            ElementId(12),
            NeighborEndpoint::ChannelSurface,
            ElementId(400),
        )
        .unwrap();
        let bytes = to_bytes(&c).unwrap();
        assert_eq!(bytes.len(), 10);
        assert_eq!(from_bytes::<NeighborConnection>(&bytes).unwrap(), c);
    }

    #[test]
    fn illegal_connection_rejected_on_decode() {
        let mut bytes = Vec::new();
        NeighborEndpoint::BoundaryInflow.encode(&mut bytes).unwrap();
        ElementId(1).encode(&mut bytes).unwrap();
        NeighborEndpoint::MeshSurface.encode(&mut bytes).unwrap();
        ElementId(2).encode(&mut bytes).unwrap();
        assert!(matches!(
            from_bytes::<NeighborConnection>(&bytes),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn unknown_endpoint_tag() {
        let bytes = [99u8];
        assert!(matches!(
            from_bytes::<NeighborEndpoint>(&bytes),
            Err(CodecError::UnknownTag { tag: 99, .. })
        ));
    }

    #[test]
    fn truncated_attributes_is_io_error() {
        let bytes = [0u8; 12];
        assert!(matches!(
            from_bytes::<NeighborAttributes>(&bytes),
            Err(CodecError::Io(_))
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = to_bytes(&ElementId(5)).unwrap();
        bytes.push(0);
        assert!(from_bytes::<ElementId>(&bytes).is_err());
    }

    #[test]
    fn channel_attributes_keep_shape() {
        let attrs = NeighborAttributes {
            x: 1.0,
            y: 2.0,
            z_top: 10.0,
            z_bottom: 9.0,
            area_or_length: 250.0,
            manning_n: 0.035,
            conductivity: 1e-6,
            porosity_or_bed_thickness: 0.5,
            channel_shape: Some(ChannelShape {
                base_width: 4.0,
                side_slope: 2.0,
                bank_full_depth: 1.0,
            }),
        };
        let back: NeighborAttributes = from_bytes(&to_bytes(&attrs).unwrap()).unwrap();
        assert_eq!(back, attrs);
    }

    #[test]
    fn invalid_transfer_rejected_on_decode() {
        let mut bytes = Vec::new();
        write_f64_le(&mut bytes, 1.0).unwrap();
        write_f64_le(&mut bytes, 5.0).unwrap();
        write_f64_le(&mut bytes, 5.0).unwrap();
        assert!(from_bytes::<WaterTransfer>(&bytes).is_err());
    }
}
