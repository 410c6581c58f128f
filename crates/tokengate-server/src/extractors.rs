use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use std::sync::Arc;
use tokengate_tokens::{ClaimSet, TokenError};

use crate::{error::ApiError, state::AppState};

/// Token from `Authorization: Bearer`, falling back to the auth cookie.
pub fn token_from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// The presented token, not yet validated.
pub struct PresentedToken(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for PresentedToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        token_from_headers(&parts.headers, &state.config.cookie_name)
            .map(PresentedToken)
            .ok_or(ApiError::Unauthorized)
    }
}

/// Extractor for authenticated requests
///
/// The token is accepted if it validates for any configured audience.
pub struct AuthenticatedUser {
    pub claims: ClaimSet,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let PresentedToken(token) = PresentedToken::from_request_parts(parts, state).await?;

        let mut last_error = None;
        for audience in &state.config.audiences {
            match state
                .tokens
                .validate(&token, audience, state.config.validation_skew)
                .await
            {
                Ok(claims) => return Ok(AuthenticatedUser { claims }),
                // Only the audience check differs between iterations
                Err(TokenError::AudienceMismatch(_)) => continue,
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        Err(last_error
            .map(ApiError::from)
            .unwrap_or(ApiError::Unauthorized))
    }
}
