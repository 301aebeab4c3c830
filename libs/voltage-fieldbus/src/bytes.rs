//! Byte buffer primitives
//!
//! [`ByteWriter`] is an append-only buffer used to build frames and to
//! accumulate partial receives. [`ByteReader`] is a cursor over a borrowed
//! byte slice used by every decoder.
//!
//! Readers never report a failed bounds check as an error: callers gate every
//! multi-byte read with [`ByteReader::can_read`]. Reading past the end without
//! checking is a programming error and panics.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Append-only byte buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteWriter {
    buf: BytesMut,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    #[inline]
    pub fn write_u16_be(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    #[inline]
    pub fn write_u16_le(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Append another writer's contents
    #[inline]
    pub fn append(&mut self, other: &ByteWriter) {
        self.buf.put_slice(&other.buf);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Read-only copy of the current contents
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }

    /// Cursor over the current contents
    pub fn reader(&self) -> ByteReader<'_> {
        ByteReader::new(&self.buf)
    }

    /// Drop the first `count` bytes (clamped to the buffer length)
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.buf.len());
        self.buf.advance(count);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl From<&[u8]> for ByteWriter {
    fn from(bytes: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(bytes),
        }
    }
}

/// Sequential cursor over a byte slice
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Whether `count` more bytes can be read
    #[inline]
    pub fn can_read(&self, count: usize) -> bool {
        self.remaining() >= count
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Bytes consumed so far
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Everything consumed so far
    pub fn consumed(&self) -> &'a [u8] {
        &self.data[..self.pos]
    }

    /// # Panics
    ///
    /// Panics if no byte remains.
    #[inline]
    pub fn read_u8(&mut self) -> u8 {
        let value = self.rest().get_u8();
        self.pos += 1;
        value
    }

    /// # Panics
    ///
    /// Panics if fewer than two bytes remain.
    #[inline]
    pub fn read_u16_be(&mut self) -> u16 {
        let value = self.rest().get_u16();
        self.pos += 2;
        value
    }

    /// # Panics
    ///
    /// Panics if fewer than two bytes remain.
    #[inline]
    pub fn read_u16_le(&mut self) -> u16 {
        let value = self.rest().get_u16_le();
        self.pos += 2;
        value
    }

    /// # Panics
    ///
    /// Panics if fewer than `count` bytes remain.
    pub fn read_bytes(&mut self, count: usize) -> &'a [u8] {
        assert!(
            self.can_read(count),
            "read of {} bytes with {} remaining",
            count,
            self.remaining()
        );
        let bytes = &self.data[self.pos..self.pos + count];
        self.pos += count;
        bytes
    }

    pub fn read_to_end(&mut self) -> &'a [u8] {
        let bytes = &self.data[self.pos..];
        self.pos = self.data.len();
        bytes
    }

    /// Split off the next `count` bytes as an independent reader
    ///
    /// # Panics
    ///
    /// Panics if fewer than `count` bytes remain.
    pub fn slice(&mut self, count: usize) -> ByteReader<'a> {
        ByteReader::new(self.read_bytes(count))
    }

    #[inline]
    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}
