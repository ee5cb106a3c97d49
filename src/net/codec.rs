//! Frame codec
//!
//! Every message on the wire is a frame:
//!
//! ```text
//! length:i32 | kind:u8 | entity_id:i32 | body
//! ```
//!
//! `length` counts the whole frame including its own four bytes, so a frame
//! with an empty body is exactly [`HEADER_SIZE`] bytes long.

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use crate::error::{ProtocolError, Result};
use crate::net::buffer::PacketBuffer;
use crate::replication::entity::NetworkId;

/// Size of the frame header: length (4) + kind (1) + entity id (4)
pub const HEADER_SIZE: usize = 9;

/// Default upper bound for a single frame (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Largest frame the `i32` length field can describe
pub const MAX_WIRE_FRAME_SIZE: usize = i32::MAX as usize;

/// Most memory reserved ahead for a frame that has not fully arrived
const RESERVE_AHEAD: usize = 64 * 1024;

/// Header fields shared by every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Message or reply type byte
    pub kind: u8,
    /// Entity the frame is about
    pub entity_id: NetworkId,
}

impl FrameHeader {
    pub fn new(kind: u8, entity_id: NetworkId) -> Self {
        Self { kind, entity_id }
    }
}

/// A decoded frame that owns its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Bytes,
}

/// Append one frame to `out`. Returns the number of bytes written.
pub fn encode_frame(header: FrameHeader, body: &[u8], out: &mut BytesMut) -> Result<usize> {
    let length = HEADER_SIZE + body.len();
    let declared = i32::try_from(length).map_err(|_| ProtocolError::FrameTooLarge {
        size: length,
        max: i32::MAX as usize,
    })?;

    let mut buf = PacketBuffer::with_capacity(length);
    buf.write_int(declared);
    buf.write_ubyte(header.kind);
    buf.write_int(header.entity_id.get());
    buf.write_bytes(body);

    if buf.len() != length {
        return Err(ProtocolError::LengthMismatch {
            claimed: length,
            actual: buf.len(),
        }
        .into());
    }

    out.extend_from_slice(buf.as_bytes());
    Ok(length)
}

/// Decode the frame starting at `offset` of a buffer holding complete frames.
///
/// Returns the header, the body and the offset of the next frame.
pub fn decode_frame(buffer: &[u8], offset: usize) -> Result<(FrameHeader, &[u8], usize)> {
    let available = buffer.len();
    if offset + HEADER_SIZE > available {
        return Err(ProtocolError::FrameOverrun {
            end: offset + HEADER_SIZE,
            available,
        }
        .into());
    }

    let mut header_buf = PacketBuffer::from_bytes(&buffer[offset..offset + HEADER_SIZE]);
    let declared = header_buf.read_int()?;
    let kind = header_buf.read_ubyte()?;
    let entity_id = NetworkId(header_buf.read_int()?);

    let length = checked_length(declared)?;
    let end = offset + length;
    if end > available {
        return Err(ProtocolError::FrameOverrun { end, available }.into());
    }

    Ok((
        FrameHeader::new(kind, entity_id),
        &buffer[offset + HEADER_SIZE..end],
        end,
    ))
}

fn checked_length(declared: i32) -> Result<usize> {
    match usize::try_from(declared) {
        Ok(length) if length >= HEADER_SIZE => Ok(length),
        _ => Err(ProtocolError::MalformedFrame {
            declared,
            header: HEADER_SIZE,
        }
        .into()),
    }
}

/// Streaming decoder for a byte stream of frames.
///
/// Bytes are appended as they arrive; complete frames are split off the front
/// and a partial trailing frame stays buffered until the rest shows up.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder that rejects frames above `max_frame_size` bytes
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Append received bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Split off the next complete frame, if there is one
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }

        let declared = i32::from_le_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]);
        let length = checked_length(declared)?;
        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            }
            .into());
        }
        if self.buffer.len() < length {
            self.buffer
                .reserve((length - self.buffer.len()).min(RESERVE_AHEAD));
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(length);
        frame.advance(4);
        let kind = frame.get_u8();
        let entity_id = NetworkId(frame.get_i32_le());

        trace!(kind = kind, entity_id = %entity_id, length = length, "Frame decoded");

        Ok(Some(Frame {
            header: FrameHeader::new(kind, entity_id),
            body: frame.freeze(),
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReplicationError;

    fn frame(kind: u8, id: i32, body: &[u8]) -> BytesMut {
        let mut out = BytesMut::new();
        encode_frame(FrameHeader::new(kind, NetworkId(id)), body, &mut out).unwrap();
        out
    }

    #[test]
    fn test_encoded_length_is_exact() {
        let out = frame(2, -1, b"abc");
        assert_eq!(out.len(), HEADER_SIZE + 3);
        assert_eq!(&out[..4], &12i32.to_le_bytes());
        assert_eq!(out[4], 2);
        assert_eq!(&out[5..9], &(-1i32).to_le_bytes());
        assert_eq!(&out[9..], b"abc");
    }

    #[test]
    fn test_decode_walks_back_to_back_frames() {
        let mut stream = frame(1, -1, b"fp");
        stream.extend_from_slice(&frame(3, -2, b""));
        stream.extend_from_slice(&frame(2, -3, &[9; 20]));

        let (h1, b1, next) = decode_frame(&stream, 0).unwrap();
        assert_eq!(h1, FrameHeader::new(1, NetworkId(-1)));
        assert_eq!(b1, b"fp");
        assert_eq!(next, 11);

        let (h2, b2, next) = decode_frame(&stream, next).unwrap();
        assert_eq!(h2.entity_id, NetworkId(-2));
        assert!(b2.is_empty());
        assert_eq!(next, 20);

        let (_, b3, next) = decode_frame(&stream, next).unwrap();
        assert_eq!(b3.len(), 20);
        assert_eq!(next, stream.len());
    }

    #[test]
    fn test_decode_rejects_overrun() {
        let stream = frame(1, -1, b"fingerprint");
        let truncated = &stream[..stream.len() - 1];
        assert!(matches!(
            decode_frame(truncated, 0),
            Err(ReplicationError::Protocol(ProtocolError::FrameOverrun { .. }))
        ));
    }

    #[test]
    fn test_decode_rejects_length_below_header() {
        let mut stream = frame(1, -1, b"");
        stream[..4].copy_from_slice(&5i32.to_le_bytes());
        assert!(matches!(
            decode_frame(&stream, 0),
            Err(ReplicationError::Protocol(ProtocolError::MalformedFrame {
                declared: 5,
                ..
            }))
        ));
    }

    #[test]
    fn test_decoder_retains_partial_frame() {
        let stream = frame(4, -1, &7i32.to_le_bytes());
        let mut decoder = FrameDecoder::default();

        decoder.extend(&stream[..6]);
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.buffered_len(), 6);

        decoder.extend(&stream[6..]);
        let decoded = decoder.next_frame().unwrap().unwrap();
        assert_eq!(decoded.header.kind, 4);
        assert_eq!(&decoded.body[..], &7i32.to_le_bytes());
        assert_eq!(decoder.buffered_len(), 0);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_decoder_accepts_frames_larger_than_one_read() {
        let payload = vec![0x5A; 64 * 1024];
        let stream = frame(2, -9, &payload);
        let mut decoder = FrameDecoder::default();

        for chunk in stream.chunks(1500) {
            decoder.extend(chunk);
        }
        let decoded = decoder.next_frame().unwrap().unwrap();
        assert_eq!(decoded.body.len(), payload.len());
    }

    #[test]
    fn test_decoder_enforces_max_frame_size() {
        let stream = frame(2, -1, &[0; 64]);
        let mut decoder = FrameDecoder::new(32);
        decoder.extend(&stream);
        assert!(matches!(
            decoder.next_frame(),
            Err(ReplicationError::Protocol(ProtocolError::FrameTooLarge {
                size: 73,
                max: 32
            }))
        ));
    }
}
