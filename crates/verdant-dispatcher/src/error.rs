//! Dispatcher error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("function not found: {0}")]
    FunctionNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no viable slot for {0}")]
    NoViableSlot(String),

    #[error("all targets failed for {0}")]
    TargetsFailed(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("schedule store error: {0}")]
    Store(#[from] verdant_store::StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn error_type(&self) -> &'static str {
        match self {
            DispatchError::FunctionNotFound(_) => "function_not_found",
            DispatchError::InvalidRequest(_) => "invalid_request",
            DispatchError::NoViableSlot(_) => "no_viable_slot",
            DispatchError::TargetsFailed(_) => "targets_failed",
            DispatchError::Queue(_) => "queue_error",
            DispatchError::Store(_) => "store_error",
            DispatchError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::FunctionNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::NoViableSlot(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::TargetsFailed(_) | DispatchError::Queue(_) => StatusCode::BAD_GATEWAY,
            DispatchError::Store(_) | DispatchError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal detail stays out of external responses.
        let message = match &self {
            DispatchError::FunctionNotFound(name) => format!("Function not found: {name}"),
            DispatchError::InvalidRequest(reason) => format!("Invalid request: {reason}"),
            DispatchError::NoViableSlot(name) => {
                format!("No viable slot within deadline for: {name}")
            }
            DispatchError::TargetsFailed(name) => {
                format!("All target regions failed for: {name}")
            }
            DispatchError::Queue(_) | DispatchError::Store(_) | DispatchError::Internal(_) => {
                "Internal server error".to_string()
            }
        };

        (status, message).into_response()
    }
}

/// Result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
