//! State, nonce and PKCE (RFC 7636) generation.

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use tokengate_signing::base64_url_encode;

pub const PKCE_METHOD: &str = "S256";

/// Generate random bytes of the specified length
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Opaque OAuth `state`, 256 bits base64url encoded.
pub fn generate_state() -> String {
    base64_url_encode(&generate_random_bytes::<32>())
}

/// OIDC nonce, 256 bits hex encoded.
pub fn generate_nonce() -> String {
    hex::encode(generate_random_bytes::<32>())
}

/// `base64url(SHA-256(verifier))`
pub fn pkce_challenge(verifier: &str) -> String {
    base64_url_encode(&Sha256::digest(verifier.as_bytes()))
}

#[derive(Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Fresh verifier (43 characters from 32 random bytes) and its S256 challenge.
pub fn build_pkce_pair() -> PkcePair {
    let verifier = base64_url_encode(&generate_random_bytes::<32>());
    let challenge = pkce_challenge(&verifier);
    PkcePair {
        verifier,
        challenge,
    }
}
