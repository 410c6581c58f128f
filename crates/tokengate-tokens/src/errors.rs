use thiserror::Error;
use tokengate_signing::SigningError;

#[derive(Error, Debug, Clone)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Algorithm mismatch: expected {expected}, found {found}")]
    AlgorithmMismatch { expected: String, found: String },

    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Issuer mismatch: {0}")]
    IssuerMismatch(String),

    #[error("Audience mismatch: {0}")]
    AudienceMismatch(String),

    #[error("Token expired: exp={exp}, now={now}")]
    Expired { exp: u64, now: u64 },

    #[error("Token not yet valid: nbf={nbf}, now={now}")]
    NotYetValid { nbf: u64, now: u64 },

    #[error("Invalid lifetime: expires_in must be positive")]
    InvalidLifetime,

    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    #[error("Reserved claim cannot be overridden: {0}")]
    ReservedClaim(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),
}

impl TokenError {
    /// The presented token is not acceptable. Callers should answer 401
    /// without revealing which check failed.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            TokenError::Malformed(_)
                | TokenError::UnsupportedAlgorithm(_)
                | TokenError::AlgorithmMismatch { .. }
                | TokenError::UnknownKeyId(_)
                | TokenError::InvalidSignature
                | TokenError::IssuerMismatch(_)
                | TokenError::AudienceMismatch(_)
                | TokenError::Expired { .. }
                | TokenError::NotYetValid { .. }
        )
    }

    /// The signing backend is down or its breaker is open.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, TokenError::Signing(e) if e.is_unavailable())
    }
}

pub type Result<T> = std::result::Result<T, TokenError>;
