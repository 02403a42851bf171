use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use concilio_core::ReconcileError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Reconcile(ReconcileError),
    Database(sqlx::Error),
}

impl From<ReconcileError> for ApiError {
    fn from(e: ReconcileError) -> Self {
        ApiError::Reconcile(e)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Database(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what.clone()),
            ApiError::Reconcile(e) => {
                let status = match e {
                    ReconcileError::DuplicateLink { .. }
                    | ReconcileError::StatusLocked
                    | ReconcileError::UnsafeMergeRejected(_) => StatusCode::CONFLICT,
                    ReconcileError::LinkNotFound { .. } => StatusCode::NOT_FOUND,
                    ReconcileError::InvalidSplitTarget(_)
                    | ReconcileError::SplitValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    ReconcileError::PartialSplitFailure { .. }
                    | ReconcileError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::Database(e) => {
                tracing::error!(error = %e, "database failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
