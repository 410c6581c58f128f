use axum::http::{header, HeaderValue};
use tokengate_federation::{Prompt, ProviderKind};

use crate::{config::Config, error::ApiError};

pub fn parse_provider(provider: &str) -> Result<ProviderKind, ApiError> {
    provider
        .parse()
        .map_err(|_| ApiError::InvalidRequest(format!("Unknown provider: {}", provider)))
}

pub fn parse_prompt(prompt: &str) -> Result<Prompt, ApiError> {
    match prompt.trim().to_lowercase().as_str() {
        "none" => Ok(Prompt::None),
        "login" => Ok(Prompt::Login),
        "consent" => Ok(Prompt::Consent),
        "select_account" => Ok(Prompt::SelectAccount),
        _ => Err(ApiError::InvalidRequest(format!("Unknown prompt: {}", prompt))),
    }
}

/// `Set-Cookie` value carrying `token` for `max_age` seconds.
pub fn auth_cookie(config: &Config, token: &str, max_age: u64) -> String {
    let mut cookie = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        config.cookie_name, token, max_age
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that removes the auth cookie.
pub fn clear_auth_cookie(config: &Config) -> String {
    auth_cookie(config, "", 0)
}

pub fn set_cookie_header(cookie: String) -> Result<(header::HeaderName, HeaderValue), ApiError> {
    let value = HeaderValue::try_from(cookie)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("invalid cookie header: {}", e)))?;
    Ok((header::SET_COOKIE, value))
}
