//! Processing failures and their HTTP mapping

use axum::http::StatusCode;
use thiserror::Error;

use crate::locator::LocatorError;
use crate::params::ParamError;

use super::task::StateError;

/// Failure raised by a processor while handling a request. Every variant
/// maps onto the status the dispatcher answers with; contract violations
/// ([`StateError`] at the task boundary) are deliberately not part of this
/// taxonomy.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MethodNotAllowed(String),

    #[error("a content length is required")]
    LengthRequired,

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::BadRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            EngineError::LengthRequired => StatusCode::LENGTH_REQUIRED,
            EngineError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            EngineError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ParamError> for EngineError {
    fn from(err: ParamError) -> Self {
        EngineError::BadRequest(err.to_string())
    }
}

impl From<LocatorError> for EngineError {
    fn from(err: LocatorError) -> Self {
        match err {
            LocatorError::TooLarge(message) => EngineError::PayloadTooLarge(message),
            LocatorError::Denied(message) => EngineError::BadRequest(message),
            LocatorError::Io(message) | LocatorError::Upstream(message) => {
                EngineError::Internal(message)
            }
        }
    }
}

// Misusing the response slot inside a processor is an internal fault of that
// processor, not of the task machinery around it.
impl From<StateError> for EngineError {
    fn from(err: StateError) -> Self {
        EngineError::Internal(err.to_string())
    }
}

/// Stable machine-readable code for an error status
pub fn error_code(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "INVALID_PARAMETER",
        StatusCode::FORBIDDEN => "FORBIDDEN",
        StatusCode::NOT_FOUND => "NOT_FOUND",
        StatusCode::METHOD_NOT_ALLOWED => "METHOD_NOT_ALLOWED",
        StatusCode::REQUEST_TIMEOUT => "REQUEST_TIMEOUT",
        StatusCode::LENGTH_REQUIRED => "LENGTH_REQUIRED",
        StatusCode::PAYLOAD_TOO_LARGE => "PAYLOAD_TOO_LARGE",
        StatusCode::UNSUPPORTED_MEDIA_TYPE => "UNSUPPORTED_MEDIA_TYPE",
        StatusCode::SERVICE_UNAVAILABLE => "OVERLOADED",
        _ => "INTERNAL_ERROR",
    }
}
