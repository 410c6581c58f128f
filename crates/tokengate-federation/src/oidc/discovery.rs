//! OIDC provider discovery via the .well-known endpoint.

use crate::errors::*;
use crate::oidc::types::ProviderMetadata;
use reqwest::Client;

/// Fetch and sanity-check an OpenID Provider configuration document.
pub async fn fetch_provider_metadata(http: &Client, discovery_url: &str) -> Result<ProviderMetadata> {
    let response = http
        .get(discovery_url)
        .send()
        .await
        .map_err(|e| FederationError::DiscoveryFailed(format!("HTTP error: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FederationError::DiscoveryFailed(format!(
            "{} returned {}",
            discovery_url, status
        )));
    }

    let metadata: ProviderMetadata = response
        .json()
        .await
        .map_err(|e| FederationError::DiscoveryFailed(format!("JSON parse error: {}", e)))?;

    if metadata.authorization_endpoint.is_none() {
        return Err(FederationError::IncompleteMetadata("authorization_endpoint"));
    }
    if metadata.token_endpoint.is_none() {
        return Err(FederationError::IncompleteMetadata("token_endpoint"));
    }

    Ok(metadata)
}
