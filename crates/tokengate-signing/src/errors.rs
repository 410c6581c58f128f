use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SigningError {
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Key does not match algorithm {algorithm}: {reason}")]
    KeyMismatch { algorithm: String, reason: String },

    #[error("Missing key material: {0}")]
    MissingKeyMaterial(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Signature operation failed: {0}")]
    SignatureFailed(String),

    #[error("Remote signer unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Remote signer rejected request: status={status}, message={message}")]
    RemoteRejected { status: u16, message: String },

    #[error("Invalid response from remote signer: {0}")]
    RemoteResponseInvalid(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Circuit open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("Signing backend closed")]
    Closed,
}

impl SigningError {
    /// Errors worth retrying: the remote side may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, SigningError::RemoteUnavailable(_))
    }

    /// Errors caused by deployment configuration rather than runtime state.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SigningError::UnsupportedAlgorithm(_)
                | SigningError::KeyMismatch { .. }
                | SigningError::MissingKeyMaterial(_)
                | SigningError::InvalidKey(_)
        )
    }

    /// Whether the caller should back off and come back later.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            SigningError::RemoteUnavailable(_) | SigningError::CircuitOpen { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SigningError::CircuitOpen { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    pub(crate) fn key_mismatch(algorithm: impl ToString, reason: impl ToString) -> Self {
        SigningError::KeyMismatch {
            algorithm: algorithm.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SigningError>;
