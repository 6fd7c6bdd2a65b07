//! HTTP error mapping.
//!
//! Every failure leaves the hub as a protocol envelope carrying both an HTTP
//! status and a protocol status code:
//!
//! ```text
//! ┌──────────────────────────────┬────────┬───────────────────────────────┐
//! │ Failure                      │ HTTP   │ Envelope                      │
//! ├──────────────────────────────┼────────┼───────────────────────────────┤
//! │ missing / unknown token      │ 401    │ 2000 client error             │
//! │ ownership, state             │ 400    │ 2000 client error             │
//! │ validation, malformed body   │ 400    │ 2001 invalid parameters       │
//! │ unknown token object         │ 404    │ 2004 unknown token            │
//! │ unknown object / platform    │ 404    │ 2003 unknown location         │
//! │ remote unreachable           │ 502    │ 3001 unable to use client API │
//! │ no common version            │ 400    │ 3002 unsupported version      │
//! │ endpoint not advertised      │ 400    │ 3003 no matching endpoints    │
//! │ storage, configuration       │ 500    │ 3000 server error             │
//! │ shutting down                │ 503    │ 3000 server error             │
//! └──────────────────────────────┴────────┴───────────────────────────────┘
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use ampere_core::envelope::status;
use ampere_core::{Envelope, ValidationError};
use ampere_sync::SyncError;

/// Result type for route handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing or invalid authorization token")]
    Unauthorized,

    #[error("Local API is disabled")]
    AdminDisabled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Sync(SyncError::Validation(err))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InvalidRequest(err.to_string())
    }
}

impl ApiError {
    /// HTTP status and envelope status code.
    pub fn codes(&self) -> (StatusCode, u32) {
        match self {
            ApiError::Unauthorized | ApiError::AdminDisabled => (StatusCode::UNAUTHORIZED, status::CLIENT_ERROR),
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, status::INVALID_PARAMETERS),
            ApiError::UnsupportedVersion(_) => (StatusCode::NOT_FOUND, status::UNSUPPORTED_VERSION),
            ApiError::Sync(err) => sync_codes(err),
        }
    }
}

fn sync_codes(err: &SyncError) -> (StatusCode, u32) {
    match err {
        SyncError::InvalidToken => (StatusCode::UNAUTHORIZED, status::CLIENT_ERROR),
        SyncError::OwnershipViolation { .. } | SyncError::StateViolation(_) => {
            (StatusCode::BAD_REQUEST, status::CLIENT_ERROR)
        }
        SyncError::Validation(_) | SyncError::Serialization(_) => {
            (StatusCode::BAD_REQUEST, status::INVALID_PARAMETERS)
        }
        SyncError::NotFound { entity, .. } if entity == "Token" => (StatusCode::NOT_FOUND, status::UNKNOWN_TOKEN),
        SyncError::NotFound { .. } | SyncError::PlatformUnknown(_) => {
            (StatusCode::NOT_FOUND, status::UNKNOWN_LOCATION)
        }
        SyncError::PlatformNotConnected(_)
        | SyncError::Remote { .. }
        | SyncError::Http(_)
        | SyncError::Timeout => (StatusCode::BAD_GATEWAY, status::UNABLE_TO_USE_CLIENT_API),
        SyncError::NoCompatibleVersion { .. } => (StatusCode::BAD_REQUEST, status::UNSUPPORTED_VERSION),
        SyncError::EndpointNotSupported { .. } => (StatusCode::BAD_REQUEST, status::NO_MATCHING_ENDPOINTS),
        SyncError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, status::SERVER_ERROR),
        SyncError::Database(_)
        | SyncError::InvalidConfig(_)
        | SyncError::ConfigLoadFailed(_)
        | SyncError::ConfigSaveFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, status::SERVER_ERROR),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (http, code) = self.codes();
        if http.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (http, Json(Envelope::<()>::error(code, self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ampere_core::ModuleId;

    #[test]
    fn test_client_errors() {
        assert_eq!(ApiError::Unauthorized.codes(), (StatusCode::UNAUTHORIZED, 2000));
        assert_eq!(
            ApiError::from(SyncError::ownership("Location", "L1", "cpo-a", "cpo-b")).codes(),
            (StatusCode::BAD_REQUEST, 2000)
        );
        assert_eq!(
            ApiError::from(ValidationError::Required { field: "id".into() }).codes(),
            (StatusCode::BAD_REQUEST, 2001)
        );
    }

    #[test]
    fn test_not_found_codes() {
        assert_eq!(
            ApiError::from(SyncError::not_found("Token", "T1")).codes().1,
            status::UNKNOWN_TOKEN
        );
        assert_eq!(
            ApiError::from(SyncError::not_found("Location", "L1")).codes().1,
            status::UNKNOWN_LOCATION
        );
    }

    #[test]
    fn test_server_errors() {
        let err = ApiError::from(SyncError::EndpointNotSupported {
            platform_id: "cpo-a".into(),
            module: ModuleId::Commands,
        });
        assert_eq!(err.codes(), (StatusCode::BAD_REQUEST, 3003));
        assert_eq!(ApiError::from(SyncError::Timeout).codes(), (StatusCode::BAD_GATEWAY, 3001));
        assert_eq!(
            ApiError::from(SyncError::Database("locked".into())).codes(),
            (StatusCode::INTERNAL_SERVER_ERROR, 3000)
        );
    }
}
