//! HTTP error mapping.
//!
//! Converts engine and storage errors into status codes plus the shared
//! error envelope, keeping handler bodies free of status bookkeeping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use stepflow_core::EngineError;
use stepflow_types::error::RepositoryError;

#[derive(Debug)]
pub enum AppError {
    Engine(EngineError),
    Validation(String),
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::Engine(err)
    }
}

impl AppError {
    /// Map to (status, machine-readable code, human-readable message).
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Engine(EngineError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "INSTANCE_NOT_FOUND",
                format!("instance not found: {id}"),
            ),
            AppError::Engine(EngineError::WorkflowNotFound(name)) => (
                StatusCode::NOT_FOUND,
                "WORKFLOW_NOT_FOUND",
                format!("workflow not registered: {name}"),
            ),
            AppError::Engine(EngineError::DuplicateInstanceId(id)) => (
                StatusCode::CONFLICT,
                "DUPLICATE_INSTANCE",
                format!("instance id already in use: {id}"),
            ),
            AppError::Engine(EngineError::Repository(RepositoryError::Unavailable(msg))) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
                format!("store unavailable: {msg}"),
            ),
            AppError::Engine(EngineError::Repository(err)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                err.to_string(),
            ),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        }

        let body = json!({
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn unknown_instance_maps_to_404() {
        let err = AppError::Engine(EngineError::NotFound(Uuid::now_v7()));
        let (status, code, _) = err.parts();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "INSTANCE_NOT_FOUND");
    }

    #[test]
    fn duplicate_id_maps_to_409() {
        let err = AppError::Engine(EngineError::DuplicateInstanceId(Uuid::now_v7()));
        let (status, code, _) = err.parts();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "DUPLICATE_INSTANCE");
    }

    #[test]
    fn unavailable_store_maps_to_503() {
        let err = AppError::Engine(EngineError::Repository(RepositoryError::Unavailable(
            "pool closed".to_string(),
        )));
        let (status, code, _) = err.parts();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(code, "STORE_UNAVAILABLE");
    }

    #[test]
    fn validation_maps_to_400() {
        let err = AppError::Validation("workflow name must not be empty".to_string());
        let (status, code, _) = err.parts();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "VALIDATION_ERROR");
    }
}
