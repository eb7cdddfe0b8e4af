//! Byte buffer helpers used by every codec in this crate.
//!
//! Writing goes through [`Writer`], an append-only wrapper around `BytesMut`
//! whose only backward write is patching a region previously handed out by
//! [`Writer::reserve`]. Reading uses free functions over `&mut Bytes`, in the
//! same style as the rest of the senax readers: every function checks the
//! remaining length and reports `InsufficientData` instead of panicking.

use crate::{EncoderError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum number of bytes a ULEB128-encoded `u64` may occupy.
const MAX_VARUINT_LEN: usize = 10;

/// A region of the output that was skipped over and must be filled in later.
///
/// A slot can only be obtained from [`Writer::reserve`] and is consumed by
/// [`Writer::patch`], so every reserved region is written exactly once.
#[derive(Debug)]
#[must_use = "a reserved slot must be patched"]
pub struct PatchSlot {
    offset: usize,
    len: usize,
}

impl PatchSlot {
    /// Absolute offset of the reserved region inside the writer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the reserved region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the slot reserves no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Append-only output buffer with a restricted backpatch capability.
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Current write position (number of bytes written so far).
    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Read-only view of everything written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer and returns the written bytes.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    #[inline]
    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    #[inline]
    pub fn put_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn put_f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Writes an unsigned integer as ULEB128.
    pub fn put_varuint(&mut self, value: u64) {
        let mut x = value;
        while x >= 0x80 {
            self.buf.put_u8((x & 0x7F) as u8 | 0x80);
            x >>= 7;
        }
        self.buf.put_u8(x as u8);
    }

    /// Writes a signed integer as zigzag + ULEB128.
    pub fn put_varint(&mut self, value: i64) {
        self.put_varuint(zigzag_encode(value));
    }

    /// Writes a length-prefixed byte string.
    pub fn put_bytes_with_len(&mut self, bytes: &[u8]) {
        self.put_varuint(bytes.len() as u64);
        self.buf.put_slice(bytes);
    }

    /// Skips `len` bytes (zero-filled) and returns a slot to fill them later.
    pub fn reserve(&mut self, len: usize) -> PatchSlot {
        let offset = self.buf.len();
        self.buf.put_bytes(0, len);
        PatchSlot { offset, len }
    }

    /// Fills a previously reserved region without moving the write cursor.
    ///
    /// # Errors
    /// Returns an error if `bytes` does not have exactly the reserved length.
    pub fn patch(&mut self, slot: PatchSlot, bytes: &[u8]) -> Result<()> {
        if bytes.len() != slot.len {
            return Err(EncoderError::Encode(format!(
                "Patch of {} bytes does not fit reserved slot of {} bytes at offset {}",
                bytes.len(),
                slot.len,
                slot.offset
            )));
        }
        self.buf[slot.offset..slot.offset + slot.len].copy_from_slice(bytes);
        Ok(())
    }
}

/// ZigZag encode a signed integer.
#[inline]
pub fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

/// ZigZag decode to a signed integer.
#[inline]
pub fn zigzag_decode(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}

#[inline]
pub fn read_u8(reader: &mut Bytes) -> Result<u8> {
    if reader.remaining() < 1 {
        return Err(EncoderError::InsufficientData);
    }
    Ok(reader.get_u8())
}

#[inline]
pub fn read_i8(reader: &mut Bytes) -> Result<i8> {
    if reader.remaining() < 1 {
        return Err(EncoderError::InsufficientData);
    }
    Ok(reader.get_i8())
}

pub fn read_f64(reader: &mut Bytes) -> Result<f64> {
    if reader.remaining() < 8 {
        return Err(EncoderError::InsufficientData);
    }
    Ok(reader.get_f64_le())
}

/// Reads a ULEB128 unsigned integer.
pub fn read_varuint(reader: &mut Bytes) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;
    for _ in 0..MAX_VARUINT_LEN {
        let byte = read_u8(reader)?;
        if shift == 63 && byte > 1 {
            return Err(EncoderError::Decode("ULEB128 overflows u64".to_string()));
        }
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
    Err(EncoderError::Decode("ULEB128 too long".to_string()))
}

/// Reads a zigzag + ULEB128 signed integer.
pub fn read_varint(reader: &mut Bytes) -> Result<i64> {
    Ok(zigzag_decode(read_varuint(reader)?))
}

/// Reads exactly `len` bytes without copying.
pub fn read_slice(reader: &mut Bytes, len: usize) -> Result<Bytes> {
    if reader.remaining() < len {
        return Err(EncoderError::InsufficientData);
    }
    Ok(reader.split_to(len))
}

/// Reads a length-prefixed byte string written by [`Writer::put_bytes_with_len`].
pub fn read_bytes_with_len(reader: &mut Bytes) -> Result<Bytes> {
    let len = read_varuint(reader)?;
    let len = usize::try_from(len)
        .map_err(|_| EncoderError::Decode(format!("Length {} does not fit in usize", len)))?;
    read_slice(reader, len)
}

/// Writes a field or level id using the compact id encoding.
///
/// `0` is the block terminator, ids `1..=250` take one byte, anything larger
/// is written as `0xFF` followed by the id as little-endian `u64`.
pub fn write_field_id_optimized(writer: &mut Writer, field_id: u64) {
    if (0..=250).contains(&field_id) {
        writer.put_u8(field_id as u8);
    } else {
        writer.put_u8(255);
        writer.buf.put_u64_le(field_id);
    }
}

/// Reads an id written by [`write_field_id_optimized`]; `Ok(0)` is the terminator.
pub fn read_field_id_optimized(reader: &mut Bytes) -> Result<u64> {
    let first_byte = read_u8(reader)?;
    if first_byte == 255 {
        if reader.remaining() < 8 {
            return Err(EncoderError::InsufficientData);
        }
        Ok(reader.get_u64_le())
    } else {
        Ok(first_byte as u64)
    }
}
