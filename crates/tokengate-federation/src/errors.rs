use thiserror::Error;
use tokengate_tokens::TokenError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Unknown or already consumed state")]
    UnknownState,

    #[error("Login session expired")]
    Expired,

    #[error("Duplicate state")]
    DuplicateState,
}

#[derive(Error, Debug)]
pub enum FederationError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Audience not allowed: {0}")]
    AudienceNotAllowed(String),

    #[error("Invalid provider configuration: {0}")]
    InvalidConfiguration(String),

    #[error("OIDC discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("Provider metadata is missing {0}")]
    IncompleteMetadata(&'static str),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authorization code rejected: {0}")]
    CodeRejected(String),

    #[error("Userinfo request rejected: status={0}")]
    UserinfoRejected(u16),

    #[error("Invalid userinfo response: {0}")]
    InvalidUserinfo(String),

    #[error("Provider did not return an ID token")]
    MissingIdToken,

    #[error("Invalid ID token: {0}")]
    InvalidIdToken(String),

    #[error("ID token signing key not found: {0}")]
    SigningKeyNotFound(String),

    #[error("Nonce mismatch")]
    NonceMismatch,

    #[error("ID token subject does not match userinfo subject")]
    SubjectMismatch,

    #[error("Login required: {0}")]
    LoginRequired(String),

    #[error("Provider returned error: {error}")]
    ProviderDenied {
        error: String,
        description: Option<String>,
    },

    #[error("Role lookup failed: {0}")]
    RoleLookup(String),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),
}

impl FederationError {
    /// What the user presented, or what the provider said about them, is not
    /// acceptable. Maps to 401.
    pub fn is_authentication(&self) -> bool {
        match self {
            FederationError::CodeRejected(_)
            | FederationError::UserinfoRejected(_)
            | FederationError::InvalidUserinfo(_)
            | FederationError::MissingIdToken
            | FederationError::InvalidIdToken(_)
            | FederationError::SigningKeyNotFound(_)
            | FederationError::NonceMismatch
            | FederationError::SubjectMismatch
            | FederationError::ProviderDenied { .. }
            | FederationError::Session(_) => true,
            FederationError::Token(e) => e.is_authentication(),
            _ => false,
        }
    }

    /// The provider needs interactive login before it will issue anything.
    pub fn is_login_required(&self) -> bool {
        matches!(self, FederationError::LoginRequired(_))
    }

    /// Upstream provider could not be reached or answered with a server error.
    pub fn is_provider_unavailable(&self) -> bool {
        matches!(
            self,
            FederationError::ProviderUnavailable(_) | FederationError::DiscoveryFailed(_)
        )
    }

    /// Malformed or disallowed request parameters. Maps to 400.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            FederationError::UnknownProvider(_)
                | FederationError::ProviderNotConfigured(_)
                | FederationError::AudienceNotAllowed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FederationError>;
