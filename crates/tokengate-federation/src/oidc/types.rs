//! OIDC wire types: provider metadata, token responses and ID token claims.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tokengate_signing::JwkSet;

/// Seconds a fetched provider JWKS is reused before refetching.
pub const JWKS_CACHE_TTL: u64 = 3600;

/// Provider endpoints, from discovery or static configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    /// Absent for plain OAuth2 providers that never issue ID tokens.
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

/// Token endpoint response (RFC 6749 section 5.1, OIDC core 3.1.3.3).
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_id_token", &self.id_token.is_some())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// `aud` may be a single string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == value,
            Audience::Multiple(auds) => auds.iter().any(|a| a == value),
        }
    }
}

/// ID token claims (OIDC core section 2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: u64,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    /// Microsoft tenant id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

/// Cached provider JWKS
#[derive(Debug, Clone)]
pub struct JwksCacheEntry {
    pub jwks: JwkSet,
    pub fetched_at: u64,
    pub ttl: u64,
}

impl JwksCacheEntry {
    pub fn new(jwks: JwkSet, fetched_at: u64) -> Self {
        Self {
            jwks,
            fetched_at,
            ttl: JWKS_CACHE_TTL,
        }
    }

    pub fn is_valid(&self, now: u64) -> bool {
        now < self.fetched_at.saturating_add(self.ttl)
    }
}
