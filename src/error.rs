use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// The error kinds the core distinguishes, independent of how they are
/// eventually transported (HTTP here; a library caller gets the same
/// enum directly).
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadInput(String),

    #[error("{0}")]
    BadState(String),

    #[error("failed to decode image: {0}")]
    DecodeFailure(String),

    #[error("font assembly failed: {0}")]
    AssemblyFailure(String),

    #[error("internal error: {0}")]
    InternalFailure(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadInput(_) => "BadInput",
            AppError::BadState(_) => "BadState",
            AppError::DecodeFailure(_) => "DecodeFailure",
            AppError::AssemblyFailure(_) => "AssemblyFailure",
            AppError::InternalFailure(_) => "InternalFailure",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::BadInput(_) | AppError::BadState(_) | AppError::DecodeFailure(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::AssemblyFailure(_) | AppError::InternalFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(kind = self.kind(), error = %self, "request failed");
        let status = self.status();
        let body = ErrorBody { error: self.to_string(), kind: self.kind() };
        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_state_maps_to_400() {
        let err = AppError::BadState("no assignments".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "BadState");
    }

    #[test]
    fn assembly_failure_maps_to_500() {
        let err = AppError::AssemblyFailure("disk full".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
