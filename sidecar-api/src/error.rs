use std::io;

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Errors answered to API clients as plain-text responses.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid path: access denied")]
    AccessDenied,
    #[error("invalid request body")]
    InvalidBody(#[source] serde_json::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("cannot download a directory")]
    IsDirectory,
    #[error("path is not a directory")]
    NotADirectory,
    #[error("destination directory does not exist")]
    MissingDestination,
    #[error("invalid file upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("invalid file upload: missing 'file' field")]
    MissingFile,
    #[error("invalid destination filename")]
    InvalidFileName,
    #[error("file type not allowed for security reasons")]
    ForbiddenFileType,
    #[error("file already exists, use overwrite=true to replace it")]
    AlreadyExists,
    #[error("cannot delete root directory")]
    DeleteRoot,
    #[error("log file not available")]
    LogUnavailable,
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("could not {action}")]
    Io {
        action: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ApiError {
    pub fn io(action: &'static str) -> impl FnOnce(io::Error) -> ApiError {
        move |source| ApiError::Io { action, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::AccessDenied
            | ApiError::InvalidBody(_)
            | ApiError::IsDirectory
            | ApiError::NotADirectory
            | ApiError::MissingDestination
            | ApiError::MissingFile
            | ApiError::InvalidFileName
            | ApiError::ForbiddenFileType
            | ApiError::DeleteRoot => StatusCode::BAD_REQUEST,
            ApiError::Multipart(err) => err.status(),
            ApiError::NotFound(_) | ApiError::LogUnavailable => StatusCode::NOT_FOUND,
            ApiError::AlreadyExists => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Io { source, .. } = &self {
            error!(error = %source, "{}", self);
        }
        (self.status(), self.to_string()).into_response()
    }
}

/// Errors that stop the file API server itself.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("rate limit must be greater than zero")]
    ZeroRateLimit,
    #[error("failed to bind file API to {bind}")]
    Bind {
        bind: String,
        #[source]
        source: io::Error,
    },
    #[error("file API server failed")]
    Serve(#[source] io::Error),
    #[error("file API server task panicked")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::AccessDenied.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("file").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::AlreadyExists.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::io("save file")(io::Error::from(io::ErrorKind::PermissionDenied)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            ApiError::AccessDenied.to_string(),
            "invalid path: access denied"
        );
        assert_eq!(ApiError::NotFound("file").to_string(), "file not found");
        assert_eq!(ApiError::RateLimited.to_string(), "Rate limit exceeded");
    }
}
