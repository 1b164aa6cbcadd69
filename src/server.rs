//! HTTP surface: one extraction endpoint plus a health check.
//!
//! ```text
//! POST /extract-bill-data   {"document": "<url>"}  → ApiResponse
//! GET  /health                                     → "OK"
//! ```
//!
//! Errors are answered as `{"detail": "..."}`. Client errors carry the cause;
//! server faults are logged and answered with a generic message.

use crate::error::BillExtractError;
use crate::extract::BillExtractor;
use crate::output::ApiResponse;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Request body: the document to extract.
#[derive(Debug, Deserialize, Serialize)]
pub struct ExtractRequest {
    pub document: String,
}

/// Error body, `{"detail": "..."}`.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// An error as the endpoint reports it.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl From<BillExtractError> for ApiError {
    fn from(e: BillExtractError) -> Self {
        let status = e.status_code();
        if e.is_client_error() {
            warn!("Rejected request: {}", e);
            Self {
                status,
                detail: e.to_string(),
            }
        } else {
            error!("Extraction failed: {}", e);
            Self {
                status,
                detail: "Internal server error".to_string(),
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

/// Build the application router around a shared extractor.
pub fn router(extractor: Arc<BillExtractor>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/extract-bill-data", post(extract_bill_data))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(extractor)
}

/// Health check
pub async fn health_check() -> &'static str {
    "OK"
}

/// Extract line items from the document named in the request body.
pub async fn extract_bill_data(
    State(extractor): State<Arc<BillExtractor>>,
    body: Result<Json<ExtractRequest>, JsonRejection>,
) -> Result<Json<ApiResponse>, ApiError> {
    let Json(request) = body?;
    let response = extractor.extract(&request.document).await?;
    Ok(Json(response))
}
