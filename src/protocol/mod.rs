//! Protocol module
//!
//! The replication protocol carried inside frames:
//! - Request and reply messages
//! - Section tree serialization used by `SECTION_EXISTS`

pub mod messages;
pub mod tree;

pub use messages::{ClientMessage, MessageType, ReplyType, ServerReply};
pub use tree::SectionRecord;
