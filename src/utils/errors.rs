//! Errors the Vitrine API can return

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{Level, event};

/// An error returned by the Vitrine API
#[derive(Debug)]
pub struct ApiError {
    /// The status code to respond with
    pub code: StatusCode,
    /// The message to respond with if one exists
    pub msg: Option<String>,
}

impl ApiError {
    /// Create a new API error
    ///
    /// # Arguments
    ///
    /// * `code` - The status code to respond with
    /// * `msg` - The message to respond with
    #[must_use]
    pub fn new(code: StatusCode, msg: Option<String>) -> Self {
        ApiError { code, msg }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.msg {
            Some(msg) => write!(f, "{}: {}", self.code, msg),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // log this error before responding
        event!(
            Level::ERROR,
            code = self.code.as_u16(),
            msg = self.msg.as_deref()
        );
        match self.msg {
            Some(msg) => {
                (self.code, Json(serde_json::json!({ "error": msg }))).into_response()
            }
            None => self.code.into_response(),
        }
    }
}

/// Return a 400 from the current function
#[macro_export]
macro_rules! bad {
    ($msg:expr) => {
        Err($crate::utils::ApiError::new(
            axum::http::StatusCode::BAD_REQUEST,
            Some($msg),
        ))
    };
}

/// Return a 404 from the current function
#[macro_export]
macro_rules! not_found {
    ($msg:expr) => {
        Err($crate::utils::ApiError::new(
            axum::http::StatusCode::NOT_FOUND,
            Some($msg),
        ))
    };
}

/// Return a 500 from the current function
#[macro_export]
macro_rules! internal_err {
    ($msg:expr) => {
        Err($crate::utils::ApiError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Some($msg),
        ))
    };
}

/// Return a 503 from the current function
#[macro_export]
macro_rules! unavailable {
    ($msg:expr) => {
        Err($crate::utils::ApiError::new(
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Some($msg),
        ))
    };
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            // a missing row is the caller's problem not ours
            sqlx::Error::RowNotFound => {
                ApiError::new(StatusCode::NOT_FOUND, Some("Not found".to_owned()))
            }
            error => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                Some(format!("Record store error: {error}")),
            ),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(error: std::io::Error) -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some(format!("IO error: {error}")),
        )
    }
}

impl From<image::ImageError> for ApiError {
    fn from(error: image::ImageError) -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some(format!("Image codec error: {error}")),
        )
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(error: axum::extract::multipart::MultipartError) -> Self {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            Some(format!("Multipart form error: {error}")),
        )
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            Some(format!("Failed to deserialize: {error}")),
        )
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(error: tokio::task::JoinError) -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some(format!("Failed to join task: {error}")),
        )
    }
}

impl<E: std::fmt::Debug, R: std::fmt::Debug> From<aws_sdk_s3::error::SdkError<E, R>> for ApiError {
    fn from(error: aws_sdk_s3::error::SdkError<E, R>) -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some(format!("Blob store error: {error:?}")),
        )
    }
}

impl From<aws_sdk_s3::primitives::ByteStreamError> for ApiError {
    fn from(error: aws_sdk_s3::primitives::ByteStreamError) -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some(format!("Blob store stream error: {error}")),
        )
    }
}

impl From<aws_sdk_s3::presigning::PresigningConfigError> for ApiError {
    fn from(error: aws_sdk_s3::presigning::PresigningConfigError) -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some(format!("Failed to build signing config: {error}")),
        )
    }
}
