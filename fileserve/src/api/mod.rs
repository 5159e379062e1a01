//! HTTP API routes for the file manager
//!
//! The whole protocol lives on one endpoint; the HTTP method and query
//! string pick the operation.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

pub mod files;

use crate::app_state::AppState;

#[derive(Clone)]
pub struct ApiState {
    pub app_state: AppState,
}

/// Configure all API routes
pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health_check))
        // GET also answers HEAD with the body stripped
        .route(
            "/api",
            get(files::get_entry)
                .post(files::create_entry)
                .put(files::update_entry)
                .delete(files::delete_entry)
                .options(files::preflight)
                .fallback(files::method_not_allowed),
        )
}

/// Health check endpoint
pub async fn health_check(State(_state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
        "status": "healthy",
        "service": "fileserve",
        "version": env!("CARGO_PKG_VERSION")
        })),
    )
}
