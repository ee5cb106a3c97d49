//! Management API module
//!
//! This module provides HTTP endpoints for:
//! - Health checks
//! - Server statistics (sessions, store size, registered types)
//! - Inspecting a stored section tree
//!
//! The API is built with Axum and shares the replication server's state.

pub mod error;
pub mod response;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::error::ApiError;
use crate::api::response::{ApiResponse, RecordInfo, ServerStats};
use crate::error::{ReplicationError, StoreError};
use crate::replication::entity::NetworkId;
use crate::AppState;

/// API version prefix
pub const API_VERSION: &str = "v1";

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    /// Replication server state
    pub app: Arc<AppState>,
}

impl ApiState {
    /// Create a new API state
    pub fn new(app: Arc<AppState>) -> Self {
        Self { app }
    }
}

/// Create the API router with all endpoints
pub fn create_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/sections/:id", get(section_tree));

    Router::new()
        .nest(&format!("/api/{}", API_VERSION), api_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Server counters
async fn stats(State(state): State<ApiState>) -> Json<ApiResponse<ServerStats>> {
    let store = state.app.store.lock().stats();
    let data = ServerStats {
        server_name: state.app.config.server_name.clone(),
        sessions: state.app.session_manager.count(),
        representations: store.representations,
        sections: store.sections,
        registered_types: state.app.registered_types(),
    };
    Json(ApiResponse::success("Server statistics", data))
}

/// Breadth-first records of one section
async fn section_tree(
    State(state): State<ApiState>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<Vec<RecordInfo>>>, ApiError> {
    let records = {
        let store = state.app.store.lock();
        match store.get(NetworkId(id)) {
            Some(representation) if representation.is_section() => {}
            _ => return Err(ApiError::NotFound(format!("Section {}", id))),
        }
        store.tree_serialization(NetworkId(id))
    };

    let records = match records {
        Ok(records) => records,
        Err(ReplicationError::Store(StoreError::UnknownSection(_))) => {
            return Err(ApiError::NotFound(format!("Section {}", id)))
        }
        Err(e) => return Err(ApiError::InternalError(e.to_string())),
    };

    let types = state.app.types.clone();
    let data = records
        .iter()
        .map(|record| RecordInfo::from_record(record, types.as_deref()))
        .collect();

    Ok(Json(ApiResponse::success("Section tree", data)))
}
