use crate::sandbox::PathError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("origin denied")]
    OriginDenied,
    #[error("request too large")]
    RequestTooLarge,
    #[error("rate limited")]
    RateLimited,
    #[error("invalid path")]
    InvalidPath,
    #[error("path outside root")]
    PathOutsideRoot,
    #[error("not found")]
    NotFound,
    #[error("exec denied: {0}")]
    ExecDenied(String),
    #[error("tool error: {0}")]
    ToolError(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "Unauthorized",
            AppError::OriginDenied => "OriginDenied",
            AppError::RequestTooLarge => "RequestTooLarge",
            AppError::RateLimited => "RateLimited",
            AppError::InvalidPath => "InvalidPath",
            AppError::PathOutsideRoot => "PathOutsideRoot",
            AppError::NotFound => "NotFound",
            AppError::ExecDenied(_) => "ExecDenied",
            AppError::ToolError(_) => "ToolError",
            AppError::Internal(_) => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::OriginDenied | AppError::PathOutsideRoot | AppError::ExecDenied(_) => {
                StatusCode::FORBIDDEN
            }
            AppError::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::InvalidPath | AppError::ToolError(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
        }
    }

    /// Maps a filesystem error without echoing OS text, which can carry paths.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound,
            kind => AppError::Internal(kind.to_string()),
        }
    }
}

impl From<PathError> for AppError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::InvalidPath => AppError::InvalidPath,
            PathError::OutsideRoot => AppError::PathOutsideRoot,
            PathError::Io(e) => AppError::from_io(&e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_errors_map_to_codes() {
        assert_eq!(AppError::from(PathError::InvalidPath).code(), "InvalidPath");
        assert_eq!(AppError::from(PathError::OutsideRoot).status(), StatusCode::FORBIDDEN);
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "/secret/place");
        let mapped = AppError::from(PathError::Io(denied));
        assert_eq!(mapped.code(), "Internal");
        assert!(!mapped.to_string().contains("/secret/place"));
    }
}
