//! Networking module
//!
//! This module handles all network-related functionality for netrep:
//! - Frame encoding and streaming decode
//! - TCP socket handling for native clients
//! - WebSocket handling for browser clients
//! - Session management
//! - Connection lifecycle on both ends

pub mod buffer;
pub mod client;
pub mod codec;
pub mod handler;
pub mod session;
pub mod transport;
