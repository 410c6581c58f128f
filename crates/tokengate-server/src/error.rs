use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokengate_federation::FederationError;
use tokengate_tokens::TokenError;

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: &'static str,
    pub message: String,
}

/// Application error type. Authentication failures never say which check failed.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or unacceptable bearer token
    #[error("Unauthorized")]
    Unauthorized,

    /// Login callback could not be turned into a token
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Login required")]
    LoginRequired,

    #[error("Temporarily unavailable, retry after {retry_after}s")]
    TemporarilyUnavailable { retry_after: u64 },

    #[error("Identity provider unavailable")]
    ProviderUnavailable,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = match &self {
            ApiError::TemporarilyUnavailable { retry_after } => Some(*retry_after),
            _ => None,
        };

        let (status, code, message) = match self {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Invalid token".to_string(),
            ),
            ApiError::AuthenticationFailed => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication failed".to_string(),
            ),
            ApiError::LoginRequired => (
                StatusCode::UNAUTHORIZED,
                "LOGIN_REQUIRED",
                "Interactive login required".to_string(),
            ),
            ApiError::TemporarilyUnavailable { retry_after } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "TEMPORARILY_UNAVAILABLE",
                format!("Temporarily unavailable, retry after {} seconds", retry_after),
            ),
            ApiError::ProviderUnavailable => (
                StatusCode::BAD_GATEWAY,
                "PROVIDER_UNAVAILABLE",
                "Identity provider unavailable".to_string(),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: ErrorDetails { code, message },
            }),
        )
            .into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

impl From<TokenError> for ApiError {
    fn from(error: TokenError) -> Self {
        if error.is_authentication() {
            tracing::warn!(error = %error, "Token rejected");
            return ApiError::Unauthorized;
        }
        match error {
            TokenError::Signing(e) if e.is_unavailable() => {
                tracing::warn!(error = %e, "Signing backend unavailable");
                ApiError::TemporarilyUnavailable {
                    retry_after: e.retry_after().map(|d| d.as_secs().max(1)).unwrap_or(1),
                }
            }
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<FederationError> for ApiError {
    fn from(error: FederationError) -> Self {
        if error.is_bad_request() {
            return ApiError::InvalidRequest(error.to_string());
        }
        match error {
            FederationError::Token(e) => e.into(),
            e if e.is_login_required() => ApiError::LoginRequired,
            e if e.is_provider_unavailable() => {
                tracing::warn!(error = %e, "Identity provider unavailable");
                ApiError::ProviderUnavailable
            }
            FederationError::Session(e) => {
                tracing::warn!(error = %e, "Login session rejected");
                ApiError::AuthenticationFailed
            }
            e if e.is_authentication() => {
                tracing::warn!(error = %e, "Login failed");
                ApiError::AuthenticationFailed
            }
            other => ApiError::Internal(other.into()),
        }
    }
}
