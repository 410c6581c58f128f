use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A federated user as seen by this service.
///
/// `id` is namespaced by provider, e.g. `github:42`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    id: String,
    email: Option<String>,
    name: Option<String>,
    roles: Vec<String>,
    affiliations: Vec<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            name: None,
            roles: Vec::new(),
            affiliations: Vec::new(),
        }
    }

    /// Identity for `user_id` at `provider`, with id `provider:user_id`.
    pub fn federated(provider: &str, user_id: &str) -> Self {
        Self::new(format!("{}:{}", provider, user_id))
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email.filter(|e| !e.is_empty());
        self
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name.filter(|n| !n.is_empty());
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_affiliations(mut self, affiliations: Vec<String>) -> Self {
        self.affiliations = affiliations;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn affiliations(&self) -> &[String] {
        &self.affiliations
    }

    /// Provider prefix of the id, if namespaced.
    pub fn provider(&self) -> Option<&str> {
        provider_prefix(&self.id)
    }
}

/// Provider prefix of a namespaced subject such as `google:1234`.
pub fn provider_prefix(subject: &str) -> Option<&str> {
    subject
        .split_once(':')
        .map(|(provider, _)| provider)
        .filter(|p| !p.is_empty())
}

/// Claims carried by tokens this service mints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSet {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: u64,
    pub iat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliations: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClaimSet {
    pub fn roles(&self) -> &[String] {
        self.roles.as_deref().unwrap_or_default()
    }

    pub fn affiliations(&self) -> &[String] {
        self.affiliations.as_deref().unwrap_or_default()
    }

    pub fn provider(&self) -> Option<&str> {
        provider_prefix(&self.sub)
    }

    /// Seconds of validity left at `now`.
    pub fn remaining_lifetime(&self, now: u64) -> u64 {
        self.exp.saturating_sub(now)
    }
}

/// JOSE header of a compact JWS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}
