use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tokengate_signing::JwkSet;

use crate::{error::ApiError, state::AppState};

/// GET /keys, /.well-known/jwks.json
pub async fn jwks(State(state): State<Arc<AppState>>) -> Result<Json<JwkSet>, ApiError> {
    Ok(Json(state.tokens.jwks().await?))
}

/// GET /.well-known/public_key.pem
pub async fn public_key_pem(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let pem = state
        .tokens
        .public_key_pem()
        .await?
        .ok_or_else(|| ApiError::NotFound("No public key for symmetric signing".to_string()))?;

    Ok(([(header::CONTENT_TYPE, "application/x-pem-file")], pem).into_response())
}
