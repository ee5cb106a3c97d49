//! Packet buffer implementation
//!
//! A byte buffer with the primitive reads and writes the replication protocol
//! is built from. Every multi-byte integer is little-endian.
//!
//! Reads are checked: running past the end of the buffer is a
//! [`ProtocolError::InsufficientData`] rather than a silent zero, since a short
//! body always means the peer and this process disagree about the format.

use bytes::{BufMut, BytesMut};

use crate::error::{ProtocolError, Result};

/// Packet buffer for reading and writing protocol data
#[derive(Debug, Clone, Default)]
pub struct PacketBuffer {
    /// Internal byte buffer
    data: BytesMut,
    /// Current read position
    read_pos: usize,
}

impl PacketBuffer {
    /// Create a new empty packet buffer
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
            read_pos: 0,
        }
    }

    /// Create a packet buffer with a specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Create a packet buffer from existing bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            read_pos: 0,
        }
    }

    // ============ Properties ============

    /// Get the current read position
    #[inline]
    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// Get the total length of the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of bytes remaining to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.read_pos)
    }

    /// Check if there are bytes remaining to read
    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Get a reference to the underlying bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get the underlying BytesMut
    #[inline]
    pub fn into_inner(self) -> BytesMut {
        self.data
    }

    // ============ Reading Methods ============

    fn take(&mut self, count: usize) -> Result<&[u8]> {
        let available = self.remaining();
        if count > available {
            return Err(ProtocolError::InsufficientData {
                expected: count,
                actual: available,
            }
            .into());
        }
        let start = self.read_pos;
        self.read_pos += count;
        Ok(&self.data[start..start + count])
    }

    /// Read an unsigned byte
    pub fn read_ubyte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a signed little-endian int (4 bytes)
    pub fn read_int(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a length field: a little-endian int that must not be negative
    pub fn read_length(&mut self) -> Result<usize> {
        let value = self.read_int()?;
        usize::try_from(value)
            .map_err(|_| ProtocolError::MalformedBody(format!("negative length {}", value)).into())
    }

    /// Read exactly `length` bytes
    pub fn read_bytes(&mut self, length: usize) -> Result<Vec<u8>> {
        Ok(self.take(length)?.to_vec())
    }

    /// Read everything that is left
    pub fn read_remaining(&mut self) -> Vec<u8> {
        let start = self.read_pos;
        self.read_pos = self.data.len();
        self.data[start..].to_vec()
    }

    // ============ Writing Methods ============

    /// Write an unsigned byte
    pub fn write_ubyte(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    /// Write a signed little-endian int (4 bytes)
    pub fn write_int(&mut self, value: i32) {
        self.data.put_i32_le(value);
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
    }
}
