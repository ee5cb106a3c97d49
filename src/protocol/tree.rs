//! Section tree serialization
//!
//! `SECTION_EXISTS` carries a whole section as a flat list of records:
//!
//! ```text
//! record_length:i32 | id:i32 | parent_id:i32 | type_id:i32 | payload
//! ```
//!
//! `record_length` includes the 16 header bytes. Records are breadth-first
//! from the section root, so every record's parent has already been seen by
//! the time the record arrives. The first record is the root and carries
//! [`NetworkId::ROOT`] as its parent.

use std::collections::HashSet;

use crate::error::{ProtocolError, Result};
use crate::net::buffer::PacketBuffer;
use crate::replication::entity::NetworkId;

/// Size of a record header: length, id, parent id, type id
pub const RECORD_HEADER_SIZE: usize = 16;

/// One entity of a serialized section tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRecord {
    pub id: NetworkId,
    pub parent_id: NetworkId,
    pub type_id: i32,
    pub payload: Vec<u8>,
}

impl SectionRecord {
    /// Encoded size of this record
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }
}

/// Append the records to `buf` in the order given
pub fn encode_tree(records: &[SectionRecord], buf: &mut PacketBuffer) -> Result<()> {
    for record in records {
        let length = record.encoded_len();
        let declared = i32::try_from(length).map_err(|_| ProtocolError::FrameTooLarge {
            size: length,
            max: i32::MAX as usize,
        })?;
        buf.write_int(declared);
        buf.write_int(record.id.get());
        buf.write_int(record.parent_id.get());
        buf.write_int(record.type_id);
        buf.write_bytes(&record.payload);
    }
    Ok(())
}

/// Decode a tree and check that parents always precede their children
pub fn decode_tree(body: &[u8]) -> Result<Vec<SectionRecord>> {
    let mut buf = PacketBuffer::from_bytes(body);
    let mut records = Vec::new();
    let mut seen = HashSet::new();

    while buf.has_remaining() {
        let length = buf.read_length()?;
        if length < RECORD_HEADER_SIZE {
            return Err(ProtocolError::MalformedBody(format!(
                "record length {} is shorter than its header",
                length
            ))
            .into());
        }
        let id = NetworkId(buf.read_int()?);
        let parent_id = NetworkId(buf.read_int()?);
        let type_id = buf.read_int()?;
        let payload = buf.read_bytes(length - RECORD_HEADER_SIZE)?;

        let parent_known = if records.is_empty() {
            parent_id.is_root()
        } else {
            seen.contains(&parent_id)
        };
        if !parent_known {
            return Err(ProtocolError::OrphanRecord { id, parent_id }.into());
        }
        if !id.is_assigned() || !seen.insert(id) {
            return Err(
                ProtocolError::MalformedBody(format!("invalid or repeated record id {}", id))
                    .into(),
            );
        }

        records.push(SectionRecord {
            id,
            parent_id,
            type_id,
            payload,
        });
    }

    if records.is_empty() {
        return Err(ProtocolError::MalformedBody("empty section tree".to_string()).into());
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReplicationError;
    use pretty_assertions::assert_eq;

    fn record(id: i32, parent_id: i32, payload: &[u8]) -> SectionRecord {
        SectionRecord {
            id: NetworkId(id),
            parent_id: NetworkId(parent_id),
            type_id: 0,
            payload: payload.to_vec(),
        }
    }

    fn encode(records: &[SectionRecord]) -> Vec<u8> {
        let mut buf = PacketBuffer::new();
        encode_tree(records, &mut buf).unwrap();
        buf.as_bytes().to_vec()
    }

    #[test]
    fn test_single_root_record_layout() {
        let bytes = encode(&[record(1, 0, b"")]);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..4], &16i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &0i32.to_le_bytes());
    }

    #[test]
    fn test_tree_decodes_in_stream_order() {
        let records = vec![
            record(1, 0, b"root"),
            record(2, 1, b""),
            record(3, 1, b"x"),
            record(4, 2, b"deep"),
        ];
        assert_eq!(decode_tree(&encode(&records)).unwrap(), records);
    }

    #[test]
    fn test_child_before_parent_is_rejected() {
        let bytes = encode(&[record(1, 0, b""), record(3, 2, b""), record(2, 1, b"")]);
        assert!(matches!(
            decode_tree(&bytes),
            Err(ReplicationError::Protocol(ProtocolError::OrphanRecord {
                id: NetworkId(3),
                parent_id: NetworkId(2)
            }))
        ));
    }

    #[test]
    fn test_root_must_hang_off_sentinel() {
        let bytes = encode(&[record(5, 1, b"")]);
        assert!(matches!(
            decode_tree(&bytes),
            Err(ReplicationError::Protocol(ProtocolError::OrphanRecord { .. }))
        ));
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let bytes = encode(&[record(1, 0, b"payload")]);
        assert!(decode_tree(&bytes[..bytes.len() - 2]).is_err());
        assert!(decode_tree(&[]).is_err());
    }
}
