//! Provider JWKS fetching.

use crate::errors::*;
use reqwest::Client;
use tokengate_signing::JwkSet;

/// Fetch JWKS from provider
pub async fn fetch_jwks(http: &Client, jwks_uri: &str) -> Result<JwkSet> {
    let response = http
        .get(jwks_uri)
        .send()
        .await
        .map_err(|e| FederationError::ProviderUnavailable(format!("Failed to fetch JWKS: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FederationError::ProviderUnavailable(format!(
            "JWKS endpoint returned {}",
            status
        )));
    }

    response
        .json()
        .await
        .map_err(|e| FederationError::ProviderUnavailable(format!("Failed to parse JWKS: {}", e)))
}
