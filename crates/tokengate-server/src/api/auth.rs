use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    api::helpers::{
        auth_cookie, clear_auth_cookie, parse_prompt, parse_provider, set_cookie_header,
    },
    error::ApiError,
    extractors::PresentedToken,
    state::AppState,
};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub provider: String,
    /// Defaults to the first configured audience
    pub aud: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub audience: String,
    pub sub: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshQuery {
    pub provider: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LoginQuery>,
) -> Result<Redirect, ApiError> {
    let provider = parse_provider(&query.provider)?;
    let prompt = query.prompt.as_deref().map(parse_prompt).transpose()?;
    let audience = match query.aud.as_deref().filter(|a| !a.is_empty()) {
        Some(aud) => aud.to_string(),
        None => state
            .config
            .audiences
            .first()
            .cloned()
            .ok_or_else(|| ApiError::InvalidRequest("aud is required".to_string()))?,
    };

    let redirect = state.flow.initiate_login(provider, &audience, prompt).await?;
    Ok(Redirect::to(&redirect.url))
}

/// GET /callback
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    if let Some(error) = query.error.as_deref() {
        let err = state
            .flow
            .handle_provider_error(
                query.state.as_deref(),
                error,
                query.error_description.as_deref(),
            )
            .await;
        return Err(err.into());
    }

    let (Some(code), Some(login_state)) = (query.code.as_deref(), query.state.as_deref()) else {
        return Err(ApiError::InvalidRequest(
            "code and state are required".to_string(),
        ));
    };

    let minted = state.flow.handle_callback(code, login_state).await?;
    let cookie = auth_cookie(&state.config, &minted.token, minted.expires_in);

    Ok((
        [set_cookie_header(cookie)?],
        Json(TokenResponse {
            sub: minted.identity.id().to_string(),
            access_token: minted.token,
            token_type: "Bearer",
            expires_in: minted.expires_in,
            audience: minted.audience,
        }),
    )
        .into_response())
}

/// GET /refresh
///
/// Sends the browser back to the provider with `prompt=none` for the same
/// audience as the presented token, which may already have expired.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RefreshQuery>,
    PresentedToken(token): PresentedToken,
) -> Result<Redirect, ApiError> {
    let provider = query.provider.as_deref().map(parse_provider).transpose()?;
    let redirect = state.flow.initiate_silent_refresh(&token, provider).await?;
    Ok(Redirect::to(&redirect.url))
}

/// POST /logout
pub async fn logout(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let cookie = clear_auth_cookie(&state.config);
    Ok((StatusCode::NO_CONTENT, [set_cookie_header(cookie)?]).into_response())
}
