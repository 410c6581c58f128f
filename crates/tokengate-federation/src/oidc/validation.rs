//! ID token validation with JWT signature verification.

use crate::errors::*;
use crate::oidc::types::IdTokenClaims;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use tokengate_signing::{Jwk, JwkSet};

/// Placeholder in multi-tenant issuers, resolved from the `tid` claim.
pub const TENANT_PLACEHOLDER: &str = "{tenantid}";

/// What a valid ID token must satisfy.
#[derive(Debug, Clone)]
pub struct IdTokenExpectations<'a> {
    pub client_id: &'a str,
    /// Expected `iss`; may contain [`TENANT_PLACEHOLDER`].
    pub issuer: Option<&'a str>,
    pub nonce: &'a str,
    /// Clock tolerance in seconds for `exp`, `nbf` and `iat`.
    pub leeway: u64,
    pub now: u64,
}

/// `kid` from the ID token header, for choosing a key set.
pub fn id_token_kid(id_token: &str) -> Result<Option<String>> {
    let header = decode_header(id_token)
        .map_err(|e| FederationError::InvalidIdToken(format!("Failed to decode header: {}", e)))?;
    Ok(header.kid)
}

/// Verify signature and claims of an ID token against a provider key set.
///
/// The nonce is compared only after the signature and standard claims pass.
pub fn validate_id_token(
    id_token: &str,
    jwks: &JwkSet,
    expected: &IdTokenExpectations<'_>,
) -> Result<IdTokenClaims> {
    let header = decode_header(id_token)
        .map_err(|e| FederationError::InvalidIdToken(format!("Failed to decode header: {}", e)))?;

    let jwk = jwks.find(header.kid.as_deref()).ok_or_else(|| {
        FederationError::SigningKeyNotFound(header.kid.clone().unwrap_or_else(|| "missing".to_string()))
    })?;

    let decoding_key = decoding_key_for(header.alg, jwk)?;

    let mut validation = Validation::new(header.alg);
    validation.set_audience(&[expected.client_id]);
    validation.set_required_spec_claims(&["exp", "aud", "sub", "iss"]);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.leeway = expected.leeway;
    if let Some(issuer) = expected.issuer.filter(|iss| !iss.contains(TENANT_PLACEHOLDER)) {
        validation.set_issuer(&[issuer]);
    }

    let claims = decode::<IdTokenClaims>(id_token, &decoding_key, &validation)
        .map_err(|e| FederationError::InvalidIdToken(format!("JWT validation failed: {}", e)))?
        .claims;

    if let Some(template) = expected.issuer.filter(|iss| iss.contains(TENANT_PLACEHOLDER)) {
        let tenant = claims
            .tid
            .as_deref()
            .ok_or_else(|| FederationError::InvalidIdToken("tid claim missing".to_string()))?;
        let issuer = template.replace(TENANT_PLACEHOLDER, tenant);
        if claims.iss != issuer {
            return Err(FederationError::InvalidIdToken(format!(
                "issuer {} does not match {}",
                claims.iss, issuer
            )));
        }
    }

    if let Some(iat) = claims.iat {
        if iat > expected.now.saturating_add(expected.leeway) {
            return Err(FederationError::InvalidIdToken(format!(
                "issued in the future: iat={}, now={}",
                iat, expected.now
            )));
        }
    }

    match claims.nonce.as_deref() {
        Some(nonce) if nonce == expected.nonce => Ok(claims),
        _ => {
            tracing::warn!(sub = %claims.sub, "ID token nonce mismatch");
            Err(FederationError::NonceMismatch)
        }
    }
}

// RSA keys verify RS*/PS*, EC keys verify ES* on the matching curve.
fn decoding_key_for(alg: Algorithm, jwk: &Jwk) -> Result<DecodingKey> {
    let mismatch = || {
        FederationError::InvalidIdToken(format!(
            "{:?} cannot be verified with a {} key",
            alg,
            jwk.base_kty()
        ))
    };

    match alg {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => {
            if jwk.base_kty() != "RSA" {
                return Err(mismatch());
            }
            let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                return Err(FederationError::InvalidIdToken("RSA JWK missing n or e".to_string()));
            };
            DecodingKey::from_rsa_components(n, e)
                .map_err(|e| FederationError::InvalidIdToken(format!("Invalid RSA key: {}", e)))
        }
        Algorithm::ES256 | Algorithm::ES384 => {
            let curve = if alg == Algorithm::ES256 { "P-256" } else { "P-384" };
            if jwk.base_kty() != "EC" || jwk.crv.as_deref() != Some(curve) {
                return Err(mismatch());
            }
            let (Some(x), Some(y)) = (jwk.x.as_deref(), jwk.y.as_deref()) else {
                return Err(FederationError::InvalidIdToken("EC JWK missing x or y".to_string()));
            };
            DecodingKey::from_ec_components(x, y)
                .map_err(|e| FederationError::InvalidIdToken(format!("Invalid EC key: {}", e)))
        }
        other => Err(FederationError::InvalidIdToken(format!(
            "algorithm {:?} not accepted for ID tokens",
            other
        ))),
    }
}
