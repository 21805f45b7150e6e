//! # Byte Cursor Buffer
//!
//! Fixed-capacity byte store with independent read and write offsets.
//!
//! `ByteBuffer` is used in both directions: sessions assemble outgoing packets in one,
//! and every connection decodes its incoming command stream from one, in place.
//!
//! ## Invariants
//! - `0 <= read_offset <= write_offset <= capacity`
//! - `readable_len() + writable_len() == capacity()` at all times
//! - A decode that needs more than `readable_len()` bytes fails with
//!   [`BufferError::Underflow`] and leaves both offsets untouched
//! - An encode that needs more than `writable_len()` bytes fails with
//!   [`BufferError::Overflow`] and writes nothing
//!
//! Writable space is a logical ceiling. When an encode fits in `writable_len()` but not
//! behind `write_offset`, the readable region is moved to the front first.
//!
//! ## Byte Order
//! All multi-byte values are little-endian, independent of the host.
//!
//! ## Usage
//! ```rust
//! use glyph_auth::core::buffer::ByteBuffer;
//!
//! let mut buf = ByteBuffer::with_capacity(16);
//! buf.write(0x01u8).unwrap();
//! buf.write(1234u16).unwrap();
//! assert_eq!(buf.readable_slice(), &[0x01, 0xD2, 0x04]);
//!
//! assert_eq!(buf.peek::<u8>().unwrap(), 0x01);
//! assert_eq!(buf.read::<u8>().unwrap(), 0x01);
//! assert_eq!(buf.read::<u16>().unwrap(), 1234);
//! assert!(buf.is_empty());
//! ```

use bytes::{Buf, BufMut};

use crate::error::BufferError;

/// Fixed-width value with a little-endian wire encoding.
pub trait WireValue: Copy + Sized {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Decode from exactly `SIZE` bytes
    fn decode(src: &[u8]) -> Self;

    /// Encode into exactly `SIZE` bytes
    fn encode(self, dst: &mut [u8]);
}

macro_rules! impl_wire_value {
    ($($ty:ty => $get:ident, $put:ident;)*) => {
        $(
            impl WireValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn decode(mut src: &[u8]) -> Self {
                    src.$get()
                }

                #[inline]
                fn encode(self, mut dst: &mut [u8]) {
                    dst.$put(self);
                }
            }
        )*
    };
}

impl_wire_value! {
    u8 => get_u8, put_u8;
    i8 => get_i8, put_i8;
    u16 => get_u16_le, put_u16_le;
    i16 => get_i16_le, put_i16_le;
    u32 => get_u32_le, put_u32_le;
    i32 => get_i32_le, put_i32_le;
    u64 => get_u64_le, put_u64_le;
    i64 => get_i64_le, put_i64_le;
    f32 => get_f32_le, put_f32_le;
    f64 => get_f64_le, put_f64_le;
}

impl WireValue for bool {
    const SIZE: usize = 1;

    #[inline]
    fn decode(src: &[u8]) -> Self {
        src[0] != 0
    }

    #[inline]
    fn encode(self, dst: &mut [u8]) {
        dst[0] = u8::from(self);
    }
}

/// Fixed-capacity byte buffer with read/write cursors
pub struct ByteBuffer {
    data: Box<[u8]>,
    read: usize,
    write: usize,
}

impl ByteBuffer {
    /// Create an empty buffer that can hold `capacity` readable bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    /// Create a full buffer whose readable bytes are `bytes`
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec().into_boxed_slice(),
            read: 0,
            write: bytes.len(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn readable_len(&self) -> usize {
        self.write - self.read
    }

    #[inline]
    pub fn writable_len(&self) -> usize {
        self.capacity() - self.readable_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.readable_len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.writable_len() == 0
    }

    /// Borrow all readable bytes without consuming them
    #[inline]
    pub fn readable_slice(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    /// Advance the read offset without returning data
    pub fn drain(&mut self, count: usize) -> Result<(), BufferError> {
        self.ensure_readable(count)?;
        self.read += count;
        Ok(())
    }

    /// Zero both offsets. Only valid once every readable byte was consumed.
    pub fn reset(&mut self) -> Result<(), BufferError> {
        if !self.is_empty() {
            return Err(BufferError::NotEmpty);
        }
        self.read = 0;
        self.write = 0;
        Ok(())
    }

    /// Run a multi-field decode. On error the read offset is restored, so a
    /// composite value is either consumed whole or not at all.
    pub fn read_atomically<T, E, F>(&mut self, decode: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
    {
        let mark = self.read;
        let result = decode(self);
        if result.is_err() {
            self.read = mark;
        }
        result
    }

    // ----------------------------------------------------------------- reading

    pub fn read<T: WireValue>(&mut self) -> Result<T, BufferError> {
        let value = self.peek()?;
        self.read += T::SIZE;
        Ok(value)
    }

    pub fn peek<T: WireValue>(&self) -> Result<T, BufferError> {
        self.ensure_readable(T::SIZE)?;
        Ok(T::decode(&self.data[self.read..self.read + T::SIZE]))
    }

    pub fn read_array<T: WireValue>(&mut self, count: usize) -> Result<Vec<T>, BufferError> {
        let values = self.peek_array(count)?;
        self.read += T::SIZE * count;
        Ok(values)
    }

    pub fn peek_array<T: WireValue>(&self, count: usize) -> Result<Vec<T>, BufferError> {
        let bytes = self.peek_slice(T::SIZE.saturating_mul(count))?;
        Ok(bytes.chunks_exact(T::SIZE).map(T::decode).collect())
    }

    /// Borrow the next `count` readable bytes without consuming them
    pub fn peek_slice(&self, count: usize) -> Result<&[u8], BufferError> {
        self.ensure_readable(count)?;
        Ok(&self.data[self.read..self.read + count])
    }

    /// Read a fixed-size byte array
    pub fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.peek_slice(N)?);
        self.read += N;
        Ok(out)
    }

    /// Read exactly `size` bytes as a string. The first NUL terminates it.
    pub fn read_string(&mut self, size: usize) -> Result<String, BufferError> {
        let bytes = self.peek_slice(size)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(size);
        let value = String::from_utf8_lossy(&bytes[..end]).into_owned();
        self.read += size;
        Ok(value)
    }

    /// Read a string prefixed by its `u8` length
    pub fn read_prefixed_string(&mut self) -> Result<String, BufferError> {
        self.read_atomically(|buf| {
            let len = buf.read::<u8>()? as usize;
            buf.read_string(len)
        })
    }

    // ----------------------------------------------------------------- writing

    pub fn write<T: WireValue>(&mut self, value: T) -> Result<(), BufferError> {
        value.encode(self.reserve_tail(T::SIZE)?);
        self.write += T::SIZE;
        Ok(())
    }

    pub fn write_array<T: WireValue>(&mut self, values: &[T]) -> Result<(), BufferError> {
        let size = T::SIZE.saturating_mul(values.len());
        let tail = self.reserve_tail(size)?;
        for (value, dst) in values.iter().zip(tail.chunks_exact_mut(T::SIZE)) {
            value.encode(dst);
        }
        self.write += size;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.reserve_tail(bytes.len())?.copy_from_slice(bytes);
        self.write += bytes.len();
        Ok(())
    }

    /// Write `value` into exactly `size` bytes, truncating or NUL-padding
    pub fn write_fixed_string(&mut self, value: &str, size: usize) -> Result<(), BufferError> {
        let tail = self.reserve_tail(size)?;
        let len = value.len().min(size);
        tail[..len].copy_from_slice(&value.as_bytes()[..len]);
        tail[len..].fill(0);
        self.write += size;
        Ok(())
    }

    /// Write a string prefixed by its `u8` length
    pub fn write_prefixed_string(&mut self, value: &str) -> Result<(), BufferError> {
        let len = u8::try_from(value.len()).map_err(|_| BufferError::Overflow {
            requested: value.len(),
            available: u8::MAX as usize,
        })?;
        let tail = self.reserve_tail(1 + value.len())?;
        tail[0] = len;
        tail[1..].copy_from_slice(value.as_bytes());
        self.write += 1 + value.len();
        Ok(())
    }

    // ---------------------------------------------------------------- internal

    #[inline]
    fn ensure_readable(&self, count: usize) -> Result<(), BufferError> {
        if count > self.readable_len() {
            return Err(BufferError::Underflow {
                requested: count,
                available: self.readable_len(),
            });
        }
        Ok(())
    }

    /// Contiguous tail slice of `count` bytes, compacting if it only fits logically
    fn reserve_tail(&mut self, count: usize) -> Result<&mut [u8], BufferError> {
        if count > self.writable_len() {
            return Err(BufferError::Overflow {
                requested: count,
                available: self.writable_len(),
            });
        }
        if self.write + count > self.capacity() {
            self.compact();
        }
        Ok(&mut self.data[self.write..self.write + count])
    }

    fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        self.data.copy_within(self.read..self.write, 0);
        self.write -= self.read;
        self.read = 0;
    }
}

impl std::fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("capacity", &self.capacity())
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let mut buf = ByteBuffer::with_capacity(16);
        buf.write(0x0102_0304u32).unwrap();
        buf.write(-2i16).unwrap();
        assert_eq!(buf.readable_slice(), &[0x04, 0x03, 0x02, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn test_underflow_leaves_offsets() {
        let mut buf = ByteBuffer::with_capacity(8);
        buf.write(0xABu8).unwrap();
        assert_eq!(
            buf.read::<u32>(),
            Err(BufferError::Underflow {
                requested: 4,
                available: 1
            })
        );
        assert_eq!(buf.readable_len(), 1);
        assert_eq!(buf.read::<u8>().unwrap(), 0xAB);
    }

    #[test]
    fn test_overflow_writes_nothing() {
        let mut buf = ByteBuffer::with_capacity(3);
        buf.write(1u8).unwrap();
        assert!(matches!(
            buf.write(7u32),
            Err(BufferError::Overflow {
                requested: 4,
                available: 2
            })
        ));
        assert_eq!(buf.readable_slice(), &[1]);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let mut buf = ByteBuffer::from_slice(&[9, 8, 7]);
        assert_eq!(buf.peek::<u8>().unwrap(), 9);
        assert_eq!(buf.peek_array::<u8>(3).unwrap(), vec![9, 8, 7]);
        assert_eq!(buf.readable_len(), 3);
        buf.drain(1).unwrap();
        assert_eq!(buf.peek::<u16>().unwrap(), u16::from_le_bytes([8, 7]));
    }

    #[test]
    fn test_read_string_stops_at_nul() {
        let mut buf = ByteBuffer::from_slice(b"WoW\0x86\0");
        assert_eq!(buf.read_string(4).unwrap(), "WoW");
        assert_eq!(buf.read_string(4).unwrap(), "x86");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_write_compacts_when_space_is_logical() {
        let mut buf = ByteBuffer::with_capacity(4);
        buf.write_bytes(&[1, 2, 3, 4]).unwrap();
        buf.drain(3).unwrap();
        assert_eq!(buf.writable_len(), 3);

        buf.write_bytes(&[5, 6, 7]).unwrap();
        assert_eq!(buf.readable_slice(), &[4, 5, 6, 7]);
        assert!(buf.is_full());
    }

    #[test]
    fn test_reset_requires_empty() {
        let mut buf = ByteBuffer::from_slice(&[1]);
        assert_eq!(buf.reset(), Err(BufferError::NotEmpty));
        buf.drain(1).unwrap();
        assert!(buf.reset().is_ok());
        assert_eq!(buf.writable_len(), 1);
    }

    #[test]
    fn test_drain_past_end_fails() {
        let mut buf = ByteBuffer::from_slice(&[1, 2]);
        assert!(buf.drain(3).is_err());
        assert_eq!(buf.readable_len(), 2);
    }

    #[test]
    fn test_read_atomically_rolls_back() {
        let mut buf = ByteBuffer::from_slice(&[5, b'a', b'b']);
        let result = buf.read_prefixed_string();
        assert!(result.is_err());
        assert_eq!(buf.readable_len(), 3);
    }

    #[test]
    fn test_prefixed_string_roundtrip() {
        let mut buf = ByteBuffer::with_capacity(32);
        buf.write_prefixed_string("TEST").unwrap();
        assert_eq!(buf.readable_slice()[0], 4);
        assert_eq!(buf.read_prefixed_string().unwrap(), "TEST");
    }

    #[test]
    fn test_fixed_string_pads_and_truncates() {
        let mut buf = ByteBuffer::with_capacity(8);
        buf.write_fixed_string("WoW", 4).unwrap();
        buf.write_fixed_string("enUSxx", 4).unwrap();
        assert_eq!(buf.readable_slice(), b"WoW\0enUS");
    }

    #[test]
    fn test_bool_decoding() {
        let mut buf = ByteBuffer::from_slice(&[0, 1, 2]);
        assert_eq!(buf.read_array::<bool>(3).unwrap(), vec![false, true, true]);
    }
}
