//! API response types for consistent JSON responses
//!
//! This module provides standardized response types for the management API,
//! ensuring consistent response structures across all endpoints.

use serde::Serialize;

use crate::protocol::tree::SectionRecord;
use crate::replication::types::TypeRegistry;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request was successful
    pub success: bool,
    /// Response message
    pub message: String,
    /// Response data (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a successful response with data
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Server counters returned by `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub server_name: String,
    /// Open replication connections
    pub sessions: usize,
    /// Entities in the authority store
    pub representations: usize,
    /// Distinct sections
    pub sections: usize,
    /// Types the server validates against; zero when validation is off
    pub registered_types: usize,
}

/// One record of a section tree, as shown by `/sections/:id`
#[derive(Debug, Clone, Serialize)]
pub struct RecordInfo {
    pub id: i32,
    pub parent_id: i32,
    pub type_id: i32,
    /// Resolved when the server has a type registry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub payload_len: usize,
}

impl RecordInfo {
    /// Summarise a stored record
    pub fn from_record(record: &SectionRecord, types: Option<&TypeRegistry>) -> Self {
        Self {
            id: record.id.get(),
            parent_id: record.parent_id.get(),
            type_id: record.type_id,
            type_name: types
                .and_then(|t| t.type_name(record.type_id).ok())
                .map(str::to_string),
            payload_len: record.payload.len(),
        }
    }
}
