//! Supported identity providers and their configuration.

use crate::errors::*;
use crate::oidc::types::ProviderMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_MICROSOFT_TENANT: &str = "common";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Github,
    Google,
    Microsoft,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Github,
        ProviderKind::Google,
        ProviderKind::Microsoft,
    ];

    /// Lowercase name, also used as the identity id prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Github => "github",
            ProviderKind::Google => "google",
            ProviderKind::Microsoft => "microsoft",
        }
    }

    pub fn default_scopes(&self) -> Vec<String> {
        let scopes: &[&str] = match self {
            ProviderKind::Github => &["read:user", "user:email"],
            ProviderKind::Google | ProviderKind::Microsoft => &["openid", "email", "profile"],
        };
        scopes.iter().map(|s| s.to_string()).collect()
    }

    /// GitHub is plain OAuth2 with fixed endpoints; the others publish
    /// `.well-known/openid-configuration`.
    pub fn default_discovery(&self, microsoft_tenant: &str) -> DiscoverySource {
        match self {
            ProviderKind::Github => DiscoverySource::Static(ProviderMetadata {
                issuer: None,
                authorization_endpoint: Some("https://github.com/login/oauth/authorize".to_string()),
                token_endpoint: Some("https://github.com/login/oauth/access_token".to_string()),
                userinfo_endpoint: Some("https://api.github.com/user".to_string()),
                jwks_uri: None,
                id_token_signing_alg_values_supported: Vec::new(),
            }),
            ProviderKind::Google => DiscoverySource::WellKnown(
                "https://accounts.google.com/.well-known/openid-configuration".to_string(),
            ),
            ProviderKind::Microsoft => DiscoverySource::WellKnown(format!(
                "https://login.microsoftonline.com/{}/v2.0/.well-known/openid-configuration",
                microsoft_tenant
            )),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = FederationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FederationError::UnknownProvider(s.to_string()))
    }
}

/// Where provider endpoints come from.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoverySource {
    /// URL of an OpenID Provider configuration document.
    WellKnown(String),
    /// Endpoints known up front; no discovery request is made.
    Static(ProviderMetadata),
}

#[derive(Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub discovery: DiscoverySource,
    pub http_timeout: Duration,
}

impl ProviderConfig {
    pub fn new(
        kind: ProviderKind,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: kind.default_scopes(),
            discovery: kind.default_discovery(DEFAULT_MICROSOFT_TENANT),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        if !scopes.is_empty() {
            self.scopes = scopes;
        }
        self
    }

    pub fn with_discovery(mut self, discovery: DiscoverySource) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(FederationError::InvalidConfiguration(format!(
                "{} client_id is empty",
                self.kind
            )));
        }
        url::Url::parse(&self.redirect_uri).map_err(|e| {
            FederationError::InvalidConfiguration(format!(
                "{} redirect_uri is invalid: {}",
                self.kind, e
            ))
        })?;
        if let DiscoverySource::WellKnown(url) = &self.discovery {
            url::Url::parse(url).map_err(|e| {
                FederationError::InvalidConfiguration(format!(
                    "{} discovery URL is invalid: {}",
                    self.kind, e
                ))
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("discovery", &self.discovery)
            .finish()
    }
}
