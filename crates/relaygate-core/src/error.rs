use relaygate_protocol::{ApiError, ErrorWithStatusCode};
use relaygate_provider_core::AdaptorError;

use crate::billing::QuotaError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("user quota is not enough")]
    InsufficientQuota(#[source] QuotaError),
    #[error("convert request failed: {0}")]
    Conversion(#[source] AdaptorError),
    #[error("build upstream request failed: {0}")]
    BuildRequest(#[source] AdaptorError),
    #[error("{0}")]
    Upstream(ErrorWithStatusCode),
    #[error("invalid api type: {0}")]
    InvalidApiType(&'static str),
    #[error("settlement failed: {0}")]
    Settlement(String),
    #[error("{0}")]
    Internal(String),
    #[error("no available channel for model {0}")]
    NoChannel(String),
}

impl RelayError {
    /// Upstream HTTP, transport and upstream decode failures; everything
    /// else is the caller's or the gateway's fault and surfaces at once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::Upstream(_))
    }

    pub fn into_status_error(self) -> ErrorWithStatusCode {
        match self {
            RelayError::Upstream(err) => err,
            RelayError::InvalidRequest(message) => ErrorWithStatusCode::new(
                400,
                ApiError::new(message, "one_api_error", "invalid_text_request"),
            ),
            err @ RelayError::InsufficientQuota(_) => {
                ErrorWithStatusCode::wrap(err, "insufficient_user_quota", 403)
            }
            err @ RelayError::Conversion(_) => {
                ErrorWithStatusCode::wrap(err, "convert_request_failed", 500)
            }
            err @ RelayError::BuildRequest(_) => {
                ErrorWithStatusCode::wrap(err, "build_request_failed", 500)
            }
            err @ RelayError::InvalidApiType(_) => {
                ErrorWithStatusCode::wrap(err, "invalid_api_type", 400)
            }
            err @ RelayError::Settlement(_) => {
                ErrorWithStatusCode::wrap(err, "settlement_failed", 500)
            }
            err @ RelayError::Internal(_) => ErrorWithStatusCode::wrap(err, "internal_error", 500),
            err @ RelayError::NoChannel(_) => {
                ErrorWithStatusCode::wrap(err, "no_available_channel", 503)
            }
        }
    }
}

pub fn not_implemented() -> ErrorWithStatusCode {
    ErrorWithStatusCode::new(
        501,
        ApiError::new("API not implemented", "one_api_error", "api_not_implemented"),
    )
}

pub fn invalid_url(method: &str, path: &str) -> ErrorWithStatusCode {
    ErrorWithStatusCode::new(
        404,
        ApiError::new(
            format!("Invalid URL ({method} {path})"),
            "invalid_request_error",
            "",
        ),
    )
}
