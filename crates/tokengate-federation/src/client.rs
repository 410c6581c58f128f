//! Client for one upstream OIDC / OAuth2 provider.

use crate::errors::*;
use crate::oidc::discovery::fetch_provider_metadata;
use crate::oidc::jwks::fetch_jwks;
use crate::oidc::pkce::{generate_nonce, generate_state, PkcePair, PKCE_METHOD};
use crate::oidc::types::{IdTokenClaims, JwksCacheEntry, ProviderMetadata, TokenResponse};
use crate::oidc::validation::{id_token_kid, validate_id_token, IdTokenExpectations};
use crate::provider::{DiscoverySource, ProviderConfig, ProviderKind};
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tokengate_signing::JwkSet;
use tokengate_tokens::current_timestamp;
use tokio::sync::RwLock;
use url::Url;

const USER_AGENT: &str = concat!("tokengate/", env!("CARGO_PKG_VERSION"));

/// OIDC `prompt` parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    None,
    Login,
    Consent,
    SelectAccount,
}

impl Prompt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prompt::None => "none",
            Prompt::Login => "login",
            Prompt::Consent => "consent",
            Prompt::SelectAccount => "select_account",
        }
    }
}

/// Inputs to [`OidcClient::build_authorization_url`]. State and nonce are
/// generated when not supplied.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationRequest<'a> {
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub prompt: Option<Prompt>,
    pub pkce: Option<&'a PkcePair>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationUrl {
    pub url: String,
    pub state: String,
    pub nonce: String,
}

/// Provider client. Metadata is discovered on first use and kept for the
/// life of the client; the JWKS is cached for an hour.
pub struct OidcClient {
    config: ProviderConfig,
    http: Client,
    metadata: RwLock<Option<Arc<ProviderMetadata>>>,
    jwks_cache: RwLock<Option<JwksCacheEntry>>,
}

impl OidcClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let http = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FederationError::InvalidConfiguration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http,
            metadata: RwLock::new(None),
            jwks_cache: RwLock::new(None),
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.config.kind
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub async fn is_discovered(&self) -> bool {
        self.metadata.read().await.is_some()
    }

    /// Provider metadata, fetched once then served from memory.
    pub async fn discover(&self) -> Result<Arc<ProviderMetadata>> {
        if let Some(metadata) = self.metadata.read().await.as_ref() {
            return Ok(metadata.clone());
        }

        let metadata = match &self.config.discovery {
            DiscoverySource::Static(metadata) => metadata.clone(),
            DiscoverySource::WellKnown(url) => {
                let metadata = fetch_provider_metadata(&self.http, url).await?;
                tracing::info!(
                    provider = %self.kind(),
                    issuer = ?metadata.issuer,
                    "Discovered provider metadata"
                );
                metadata
            }
        };

        let mut slot = self.metadata.write().await;
        Ok(slot.get_or_insert(Arc::new(metadata)).clone())
    }

    pub async fn build_authorization_url(
        &self,
        request: AuthorizationRequest<'_>,
    ) -> Result<AuthorizationUrl> {
        let metadata = self.discover().await?;
        let endpoint = metadata
            .authorization_endpoint
            .as_deref()
            .ok_or(FederationError::IncompleteMetadata("authorization_endpoint"))?;

        let mut url = Url::parse(endpoint).map_err(|e| {
            FederationError::InvalidConfiguration(format!("Invalid authorization endpoint: {}", e))
        })?;

        let state = request.state.unwrap_or_else(generate_state);
        let nonce = request.nonce.unwrap_or_else(generate_nonce);

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("scope", &self.config.scopes.join(" "))
                .append_pair("state", &state)
                .append_pair("nonce", &nonce);
            if let Some(pkce) = request.pkce {
                query
                    .append_pair("code_challenge", &pkce.challenge)
                    .append_pair("code_challenge_method", PKCE_METHOD);
            }
            if let Some(prompt) = request.prompt {
                query.append_pair("prompt", prompt.as_str());
            }
        }

        Ok(AuthorizationUrl {
            url: url.to_string(),
            state,
            nonce,
        })
    }

    /// Exchange an authorization code at the token endpoint.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse> {
        let metadata = self.discover().await?;
        let endpoint = metadata
            .token_endpoint
            .as_deref()
            .ok_or(FederationError::IncompleteMetadata("token_endpoint"))?;

        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        let response = self
            .http
            .post(endpoint)
            .header(header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| unavailable("Token exchange", e))?;

        let status = response.status();
        if is_upstream_failure(status) {
            return Err(FederationError::ProviderUnavailable(format!(
                "Token endpoint returned {}",
                status
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            FederationError::CodeRejected(format!("Unreadable token response ({}): {}", status, e))
        })?;

        // GitHub reports errors with 200 and an `error` member
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            tracing::warn!(provider = %self.kind(), error, "Token exchange rejected");
            return Err(FederationError::CodeRejected(error.to_string()));
        }
        if !status.is_success() {
            return Err(FederationError::CodeRejected(format!(
                "token endpoint returned {}",
                status
            )));
        }

        serde_json::from_value(body).map_err(|e| {
            FederationError::CodeRejected(format!("Failed to parse token response: {}", e))
        })
    }

    /// Fetch the raw userinfo document with the provider access token.
    pub async fn fetch_userinfo(&self, access_token: &str) -> Result<Value> {
        let metadata = self.discover().await?;
        let endpoint = metadata
            .userinfo_endpoint
            .as_deref()
            .ok_or(FederationError::IncompleteMetadata("userinfo_endpoint"))?;

        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| unavailable("Userinfo request", e))?;

        let status = response.status();
        if is_upstream_failure(status) {
            return Err(FederationError::ProviderUnavailable(format!(
                "Userinfo endpoint returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(FederationError::UserinfoRejected(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| FederationError::InvalidUserinfo(e.to_string()))
    }

    /// Verify an ID token issued to this client. An unknown `kid` triggers
    /// one JWKS refetch to pick up rotated keys.
    pub async fn verify_id_token(
        &self,
        id_token: &str,
        expected_nonce: &str,
        leeway: u64,
    ) -> Result<IdTokenClaims> {
        let metadata = self.discover().await?;
        let expected = IdTokenExpectations {
            client_id: &self.config.client_id,
            issuer: metadata.issuer.as_deref(),
            nonce: expected_nonce,
            leeway,
            now: current_timestamp(),
        };

        let kid = id_token_kid(id_token)?;
        let mut jwks = self.jwks(false).await?;
        if jwks.find(kid.as_deref()).is_none() {
            tracing::info!(
                provider = %self.kind(),
                kid = ?kid,
                "Unknown ID token kid, refreshing provider JWKS"
            );
            jwks = self.jwks(true).await?;
        }

        validate_id_token(id_token, &jwks, &expected)
    }

    async fn jwks(&self, force_refresh: bool) -> Result<JwkSet> {
        let now = current_timestamp();
        if !force_refresh {
            if let Some(entry) = self.jwks_cache.read().await.as_ref() {
                if entry.is_valid(now) {
                    return Ok(entry.jwks.clone());
                }
            }
        }

        let metadata = self.discover().await?;
        let jwks_uri = metadata
            .jwks_uri
            .as_deref()
            .ok_or(FederationError::IncompleteMetadata("jwks_uri"))?;
        let jwks = fetch_jwks(&self.http, jwks_uri).await?;

        *self.jwks_cache.write().await = Some(JwksCacheEntry::new(jwks.clone(), now));
        Ok(jwks)
    }
}

fn is_upstream_failure(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn unavailable(context: &str, e: reqwest::Error) -> FederationError {
    FederationError::ProviderUnavailable(format!("{} failed: {}", context, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github_client() -> OidcClient {
        OidcClient::new(ProviderConfig::new(
            ProviderKind::Github,
            "test_client",
            "test_secret",
            "http://localhost/callback",
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_authorization_url() {
        let client = github_client();
        let pkce = crate::build_pkce_pair();
        let auth = client
            .build_authorization_url(AuthorizationRequest {
                state: Some("test_state".to_string()),
                nonce: None,
                prompt: Some(Prompt::None),
                pkce: Some(&pkce),
            })
            .await
            .unwrap();

        let url = Url::parse(&auth.url).unwrap();
        assert_eq!(url.host_str(), Some("github.com"));
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["client_id"], "test_client");
        assert_eq!(query["redirect_uri"], "http://localhost/callback");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["scope"], "read:user user:email");
        assert_eq!(query["state"], "test_state");
        assert_eq!(query["nonce"], auth.nonce);
        assert_eq!(query["code_challenge"], pkce.challenge);
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["prompt"], "none");
        assert_eq!(auth.state, "test_state");
    }

    #[tokio::test]
    async fn test_static_metadata_needs_no_network() {
        let client = github_client();
        assert!(!client.is_discovered().await);
        let metadata = client.discover().await.unwrap();
        assert!(metadata.jwks_uri.is_none());
        assert!(client.is_discovered().await);
    }

    #[tokio::test]
    async fn test_generated_state_differs_per_request() {
        let client = github_client();
        let a = client
            .build_authorization_url(AuthorizationRequest::default())
            .await
            .unwrap();
        let b = client
            .build_authorization_url(AuthorizationRequest::default())
            .await
            .unwrap();
        assert_ne!(a.state, b.state);
        assert_ne!(a.nonce, b.nonce);
        assert!(!a.url.contains("code_challenge"));
    }
}
