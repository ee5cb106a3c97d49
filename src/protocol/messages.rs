//! Replication messages
//!
//! Client to server:
//! - `CHECK_SECTION`: does a section with this fingerprint exist?
//! - `CREATE_NEW`: create a child under an existing entity
//! - `CREATE_NEW_SECTION`: create a section root
//!
//! Server to client:
//! - `SECTION_EXISTS`: the section, serialized as a tree
//! - `SECTION_DOESNT_EXIST`: empty
//! - `CREATED` / `SECTION_CREATED`: the id assigned to the requester
//!
//! Every frame's entity id is the requester's placeholder id, so replies can
//! be matched to the entity that asked.

use bytes::BytesMut;

use crate::error::{ProtocolError, Result};
use crate::net::buffer::PacketBuffer;
use crate::net::codec::{encode_frame, Frame, FrameHeader};
use crate::protocol::tree::{decode_tree, encode_tree, SectionRecord};
use crate::replication::entity::NetworkId;

/// Client to server message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    CheckSection = 1,
    CreateNew = 2,
    CreateNewSection = 3,
}

impl MessageType {
    /// Convert a u8 to a MessageType
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::CheckSection),
            2 => Some(Self::CreateNew),
            3 => Some(Self::CreateNewSection),
            _ => None,
        }
    }

    /// Get the type byte
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get the name of this message type
    pub fn name(&self) -> &'static str {
        match self {
            Self::CheckSection => "CHECK_SECTION",
            Self::CreateNew => "CREATE_NEW",
            Self::CreateNewSection => "CREATE_NEW_SECTION",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.as_u8())
    }
}

/// Server to client reply types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReplyType {
    SectionExists = 1,
    SectionDoesntExist = 2,
    Created = 3,
    SectionCreated = 4,
}

impl ReplyType {
    /// Convert a u8 to a ReplyType
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::SectionExists),
            2 => Some(Self::SectionDoesntExist),
            3 => Some(Self::Created),
            4 => Some(Self::SectionCreated),
            _ => None,
        }
    }

    /// Get the type byte
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get the name of this reply type
    pub fn name(&self) -> &'static str {
        match self {
            Self::SectionExists => "SECTION_EXISTS",
            Self::SectionDoesntExist => "SECTION_DOESNT_EXIST",
            Self::Created => "CREATED",
            Self::SectionCreated => "SECTION_CREATED",
        }
    }
}

impl std::fmt::Display for ReplyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.as_u8())
    }
}

/// A request sent by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    CheckSection {
        entity_id: NetworkId,
        fingerprint: Vec<u8>,
    },
    CreateNew {
        entity_id: NetworkId,
        type_id: i32,
        parent_id: NetworkId,
        payload: Vec<u8>,
    },
    CreateNewSection {
        entity_id: NetworkId,
        type_id: i32,
        fingerprint: Vec<u8>,
        payload: Vec<u8>,
    },
}

impl ClientMessage {
    /// Message type of this request
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::CheckSection { .. } => MessageType::CheckSection,
            Self::CreateNew { .. } => MessageType::CreateNew,
            Self::CreateNewSection { .. } => MessageType::CreateNewSection,
        }
    }

    /// Placeholder id of the requesting entity
    pub fn entity_id(&self) -> NetworkId {
        match self {
            Self::CheckSection { entity_id, .. }
            | Self::CreateNew { entity_id, .. }
            | Self::CreateNewSection { entity_id, .. } => *entity_id,
        }
    }

    /// Append the framed message to `out`
    pub fn encode(&self, out: &mut BytesMut) -> Result<usize> {
        let mut body = PacketBuffer::new();
        match self {
            Self::CheckSection { fingerprint, .. } => {
                body.write_bytes(fingerprint);
            }
            Self::CreateNew {
                type_id,
                parent_id,
                payload,
                ..
            } => {
                body.write_int(*type_id);
                body.write_int(parent_id.get());
                body.write_bytes(payload);
            }
            Self::CreateNewSection {
                type_id,
                fingerprint,
                payload,
                ..
            } => {
                body.write_int(*type_id);
                body.write_int(length_field(fingerprint.len())?);
                body.write_bytes(fingerprint);
                body.write_bytes(payload);
            }
        }

        let header = FrameHeader::new(self.message_type().as_u8(), self.entity_id());
        encode_frame(header, body.as_bytes(), out)
    }

    /// Parse a request from a decoded frame
    pub fn decode(frame: &Frame) -> Result<Self> {
        let message_type = MessageType::from_u8(frame.header.kind)
            .ok_or(ProtocolError::InvalidMessageType(frame.header.kind))?;
        let entity_id = frame.header.entity_id;
        let mut body = PacketBuffer::from_bytes(&frame.body);

        Ok(match message_type {
            MessageType::CheckSection => Self::CheckSection {
                entity_id,
                fingerprint: body.read_remaining(),
            },
            MessageType::CreateNew => Self::CreateNew {
                entity_id,
                type_id: body.read_int()?,
                parent_id: NetworkId(body.read_int()?),
                payload: body.read_remaining(),
            },
            MessageType::CreateNewSection => {
                let type_id = body.read_int()?;
                let fingerprint_len = body.read_length()?;
                let fingerprint = body.read_bytes(fingerprint_len)?;
                Self::CreateNewSection {
                    entity_id,
                    type_id,
                    fingerprint,
                    payload: body.read_remaining(),
                }
            }
        })
    }
}

/// A reply sent by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReply {
    SectionExists {
        entity_id: NetworkId,
        records: Vec<SectionRecord>,
    },
    SectionDoesntExist {
        entity_id: NetworkId,
    },
    Created {
        entity_id: NetworkId,
        assigned_id: NetworkId,
    },
    SectionCreated {
        entity_id: NetworkId,
        assigned_id: NetworkId,
    },
}

impl ServerReply {
    /// Reply type of this reply
    pub fn reply_type(&self) -> ReplyType {
        match self {
            Self::SectionExists { .. } => ReplyType::SectionExists,
            Self::SectionDoesntExist { .. } => ReplyType::SectionDoesntExist,
            Self::Created { .. } => ReplyType::Created,
            Self::SectionCreated { .. } => ReplyType::SectionCreated,
        }
    }

    /// Placeholder id of the entity this reply answers
    pub fn entity_id(&self) -> NetworkId {
        match self {
            Self::SectionExists { entity_id, .. }
            | Self::SectionDoesntExist { entity_id }
            | Self::Created { entity_id, .. }
            | Self::SectionCreated { entity_id, .. } => *entity_id,
        }
    }

    /// Append the framed reply to `out`
    pub fn encode(&self, out: &mut BytesMut) -> Result<usize> {
        let mut body = PacketBuffer::new();
        match self {
            Self::SectionExists { records, .. } => encode_tree(records, &mut body)?,
            Self::SectionDoesntExist { .. } => {}
            Self::Created { assigned_id, .. } | Self::SectionCreated { assigned_id, .. } => {
                body.write_int(assigned_id.get());
            }
        }

        let header = FrameHeader::new(self.reply_type().as_u8(), self.entity_id());
        encode_frame(header, body.as_bytes(), out)
    }

    /// Parse a reply from a decoded frame
    pub fn decode(frame: &Frame) -> Result<Self> {
        let reply_type = ReplyType::from_u8(frame.header.kind)
            .ok_or(ProtocolError::InvalidReplyType(frame.header.kind))?;
        let entity_id = frame.header.entity_id;

        Ok(match reply_type {
            ReplyType::SectionExists => Self::SectionExists {
                entity_id,
                records: decode_tree(&frame.body)?,
            },
            ReplyType::SectionDoesntExist => Self::SectionDoesntExist { entity_id },
            ReplyType::Created => Self::Created {
                entity_id,
                assigned_id: read_assigned_id(&frame.body)?,
            },
            ReplyType::SectionCreated => Self::SectionCreated {
                entity_id,
                assigned_id: read_assigned_id(&frame.body)?,
            },
        })
    }
}

fn read_assigned_id(body: &[u8]) -> Result<NetworkId> {
    let mut buf = PacketBuffer::from_bytes(body);
    let id = NetworkId(buf.read_int()?);
    if !id.is_assigned() {
        return Err(ProtocolError::MalformedBody(format!("assigned id {} is not positive", id)).into());
    }
    Ok(id)
}

fn length_field(length: usize) -> Result<i32> {
    i32::try_from(length).map_err(|_| {
        ProtocolError::FrameTooLarge {
            size: length,
            max: i32::MAX as usize,
        }
        .into()
    })
}
