use crate::algorithm::SigningAlgorithm;
use crate::circuit_breaker::CircuitState;
use crate::errors::Result;
use crate::jwk::Jwk;
use async_trait::async_trait;

/// Payload signed by [`SigningBackend::health_check`].
pub const HEALTH_PROBE_MESSAGE: &[u8] = b"tokengate-health-probe";

/// Produces and checks JWS signatures over `base64url(header) "." base64url(payload)`.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    fn algorithm(&self) -> SigningAlgorithm;

    /// Key identifier placed in the JWT header and the JWK.
    fn key_id(&self) -> &str;

    /// Sign a message, returning the raw JWS signature bytes.
    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    async fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool>;

    /// Public JWK, `None` for symmetric keys.
    async fn public_key_jwk(&self) -> Result<Option<Jwk>>;

    /// Public key as PEM, `None` for symmetric keys.
    async fn public_key_pem(&self) -> Result<Option<String>>;

    /// Returns true when a probe signature can be produced.
    async fn health_check(&self) -> bool {
        match self.sign(HEALTH_PROBE_MESSAGE).await {
            Ok(signature) => !signature.is_empty(),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    key_id = %self.key_id(),
                    "Signing backend health check failed"
                );
                false
            }
        }
    }

    /// Breaker state for backends that call out to a remote service.
    fn circuit_state(&self) -> Option<CircuitState> {
        None
    }

    /// Release held resources. Never fails; problems are logged.
    async fn close(&self) {}
}
