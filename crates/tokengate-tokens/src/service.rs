//! Minting and validation of compact JWS tokens.

use crate::errors::*;
use crate::types::*;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokengate_signing::{base64_url_decode, base64_url_encode, JwkSet, SigningAlgorithm, SigningBackend};
use uuid::Uuid;

/// Claim names callers cannot set through `extra_claims`.
pub const RESERVED_CLAIMS: &[&str] = &[
    "iss",
    "sub",
    "aud",
    "exp",
    "iat",
    "nbf",
    "jti",
    "email",
    "name",
    "roles",
    "affiliations",
];

/// Get current Unix timestamp in seconds
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Issues and checks tokens signed by one [`SigningBackend`].
pub struct TokenService {
    backend: Arc<dyn SigningBackend>,
    issuer: String,
    default_expires_in: u64,
}

impl TokenService {
    pub fn new(backend: Arc<dyn SigningBackend>, issuer: impl Into<String>, default_expires_in: u64) -> Self {
        Self {
            backend,
            issuer: issuer.into(),
            default_expires_in,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn default_expires_in(&self) -> u64 {
        self.default_expires_in
    }

    pub fn backend(&self) -> &Arc<dyn SigningBackend> {
        &self.backend
    }

    /// Mint a token for `identity` scoped to `audience`.
    pub async fn mint(
        &self,
        identity: &Identity,
        audience: &str,
        expires_in: Option<u64>,
        extra_claims: Option<Map<String, Value>>,
    ) -> Result<String> {
        let expires_in = expires_in.unwrap_or(self.default_expires_in);
        if expires_in == 0 {
            return Err(TokenError::InvalidLifetime);
        }
        if audience.trim().is_empty() {
            return Err(TokenError::InvalidAudience("audience is empty".to_string()));
        }

        let extra = extra_claims.unwrap_or_default();
        if let Some(reserved) = extra.keys().find(|k| RESERVED_CLAIMS.contains(&k.as_str())) {
            return Err(TokenError::ReservedClaim(reserved.clone()));
        }

        let now = current_timestamp();
        let exp = now
            .checked_add(expires_in)
            .ok_or(TokenError::InvalidLifetime)?;
        let claims = ClaimSet {
            iss: self.issuer.clone(),
            sub: identity.id().to_string(),
            aud: audience.to_string(),
            exp,
            iat: now,
            nbf: Some(now),
            jti: Uuid::new_v4().to_string(),
            email: identity.email().map(str::to_string),
            name: identity.name().map(str::to_string),
            roles: non_empty(identity.roles()),
            affiliations: non_empty(identity.affiliations()),
            extra,
        };

        let header = TokenHeader {
            alg: self.backend.algorithm().as_str().to_string(),
            typ: Some("JWT".to_string()),
            kid: Some(self.backend.key_id().to_string()),
        };

        let signing_input = format!(
            "{}.{}",
            encode_segment(&header)?,
            encode_segment(&claims)?
        );
        let signature = self.backend.sign(signing_input.as_bytes()).await?;

        tracing::debug!(
            sub = %claims.sub,
            aud = %claims.aud,
            jti = %claims.jti,
            exp = claims.exp,
            "Minted token"
        );

        Ok(format!("{}.{}", signing_input, base64_url_encode(&signature)))
    }

    /// Validate `token` for `audience` at the current time.
    pub async fn validate(&self, token: &str, audience: &str, max_skew: u64) -> Result<ClaimSet> {
        self.validate_at(token, audience, max_skew, current_timestamp())
            .await
    }

    /// Validate `token` for `audience` as of `now`.
    ///
    /// Checks run in order: structure, header algorithm and kid, signature,
    /// then issuer, audience, expiry and not-before with `max_skew` seconds
    /// of tolerance.
    pub async fn validate_at(
        &self,
        token: &str,
        audience: &str,
        max_skew: u64,
        now: u64,
    ) -> Result<ClaimSet> {
        let segments = split_token(token)?;
        let header: TokenHeader = decode_segment(segments.header, "header")?;
        let payload = base64_url_decode(segments.payload)
            .map_err(|_| TokenError::Malformed("payload is not base64url".to_string()))?;
        let signature = base64_url_decode(segments.signature)
            .map_err(|_| TokenError::Malformed("signature is not base64url".to_string()))?;

        let algorithm: SigningAlgorithm = header
            .alg
            .parse()
            .map_err(|_| TokenError::UnsupportedAlgorithm(header.alg.clone()))?;
        let expected = self.backend.algorithm();
        if algorithm != expected {
            return Err(TokenError::AlgorithmMismatch {
                expected: expected.to_string(),
                found: algorithm.to_string(),
            });
        }

        if let Some(kid) = &header.kid {
            if kid != self.backend.key_id() {
                return Err(TokenError::UnknownKeyId(kid.clone()));
            }
        }
        if let Some(typ) = &header.typ {
            if !typ.eq_ignore_ascii_case("JWT") {
                return Err(TokenError::Malformed(format!("unexpected typ {}", typ)));
            }
        }

        if signature.is_empty() {
            return Err(TokenError::InvalidSignature);
        }
        let signing_input = &token[..segments.header.len() + 1 + segments.payload.len()];
        if !self
            .backend
            .verify(signing_input.as_bytes(), &signature)
            .await?
        {
            return Err(TokenError::InvalidSignature);
        }

        let claims: ClaimSet = serde_json::from_slice(&payload)
            .map_err(|e| TokenError::Malformed(format!("claims: {}", e)))?;

        if claims.iss != self.issuer {
            return Err(TokenError::IssuerMismatch(claims.iss));
        }
        if audience.is_empty() || claims.aud != audience {
            return Err(TokenError::AudienceMismatch(claims.aud));
        }
        if claims.exp.saturating_add(max_skew) < now {
            return Err(TokenError::Expired {
                exp: claims.exp,
                now,
            });
        }
        if let Some(nbf) = claims.nbf {
            if nbf > now.saturating_add(max_skew) {
                return Err(TokenError::NotYetValid { nbf, now });
            }
        }

        Ok(claims)
    }

    /// Public keys for verifying this service's tokens. Empty for HMAC.
    pub async fn jwks(&self) -> Result<JwkSet> {
        Ok(match self.backend.public_key_jwk().await? {
            Some(jwk) => JwkSet::new(vec![jwk]),
            None => JwkSet::empty(),
        })
    }

    /// Public key PEM, `None` for HMAC.
    pub async fn public_key_pem(&self) -> Result<Option<String>> {
        Ok(self.backend.public_key_pem().await?)
    }

    /// Decode claims without verifying anything. Only for choosing a provider
    /// or audience before a fresh login.
    pub fn peek_claims(token: &str) -> Result<ClaimSet> {
        let segments = split_token(token)?;
        decode_segment(segments.payload, "payload")
    }
}

struct Segments<'a> {
    header: &'a str,
    payload: &'a str,
    signature: &'a str,
}

fn split_token(token: &str) -> Result<Segments<'_>> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None)
            if !header.is_empty() && !payload.is_empty() =>
        {
            Ok(Segments {
                header,
                payload,
                signature,
            })
        }
        _ => Err(TokenError::Malformed("expected three segments".to_string())),
    }
}

fn encode_segment<T: serde::Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value).map_err(|e| TokenError::Serialization(e.to_string()))?;
    Ok(base64_url_encode(&json))
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str, what: &str) -> Result<T> {
    let bytes = base64_url_decode(segment)
        .map_err(|_| TokenError::Malformed(format!("{} is not base64url", what)))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(format!("{}: {}", what, e)))
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}
