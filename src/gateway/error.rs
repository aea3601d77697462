//! Handler-level error taxonomy and its JSON rendering.

use hyper::StatusCode;
use thiserror::Error;

use crate::api::types::ErrorResponse;
use crate::capability::CapabilityError;
use crate::lifecycle::LifecycleError;

use super::{json_response, GatewayResponse};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid request method")]
    InvalidMethod,
    #[error("Repository is not unlocked")]
    NotUnlocked,
    #[error("File not found")]
    NotFound,
    #[error("Invalid request path")]
    InvalidPath,
    #[error("{0}")]
    InvalidRequestBody(String),
    #[error("{0}")]
    UpstreamFailure(String),
    #[error("request timed out")]
    Timeout,
    /// Error that carries its own HTTP status.
    #[error("{message}")]
    Status { status: StatusCode, message: String },
}

impl GatewayError {
    /// HTTP status for the error response. Defaults to 400.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Status { status, .. } => *status,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Render as `{"error": message}` with the error's status.
    pub fn into_response(self) -> GatewayResponse {
        let status = self.status();
        json_response(
            status,
            &ErrorResponse {
                error: self.to_string(),
            },
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::UpstreamFailure(format!("Upstream request failed: {}", err))
        }
    }
}

impl From<CapabilityError> for GatewayError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::NotFound => GatewayError::NotFound,
            CapabilityError::Timeout => GatewayError::Timeout,
            CapabilityError::InvalidRequest(msg) => GatewayError::InvalidRequestBody(msg),
            other => GatewayError::UpstreamFailure(other.to_string()),
        }
    }
}

impl From<LifecycleError> for GatewayError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotEnabled => GatewayError::NotUnlocked,
            LifecycleError::Capability(e) => e.into(),
            LifecycleError::InvalidKey(msg) => GatewayError::InvalidRequestBody(msg),
            other => GatewayError::UpstreamFailure(other.to_string()),
        }
    }
}
