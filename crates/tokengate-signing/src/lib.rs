//! Signing primitives for tokengate.
//!
//! A [`SigningBackend`] produces JWS signatures either from key material held
//! in process ([`LocalSigningBackend`]) or by delegating to a remote key-vault
//! service ([`RemoteSigningBackend`]). Remote calls are wrapped in
//! [`retry_with_backoff`] and guarded by a [`CircuitBreaker`].

pub mod algorithm;
pub mod backend;
pub mod circuit_breaker;
pub mod errors;
pub mod jwk;
pub mod local;
pub mod public_key;
pub mod remote;
pub mod retry;
mod utils;

pub use algorithm::{AlgorithmFamily, EcCurve, HashAlgorithm, SigningAlgorithm};
pub use backend::{SigningBackend, HEALTH_PROBE_MESSAGE};
pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use errors::*;
pub use jwk::{Jwk, JwkSet};
pub use local::{KeyMaterial, LocalSigningBackend};
pub use public_key::PublicKey;
pub use remote::{
    CredentialProvider, RemoteKeyRef, RemoteSignerConfig, RemoteSigningBackend, StaticCredential,
};
pub use retry::{retry_with_backoff, RetryPolicy, Transient};
pub use utils::{base64_url_decode, base64_url_decode_lenient, base64_url_encode};
