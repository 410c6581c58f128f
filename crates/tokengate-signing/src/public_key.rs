use crate::algorithm::{AlgorithmFamily, EcCurve, HashAlgorithm, SigningAlgorithm};
use crate::errors::{Result, SigningError};
use crate::jwk::Jwk;
use crate::utils::{base64_url_decode_lenient, base64_url_encode};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::pkcs1v15;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::signature::Verifier;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};

/// Public half of an asymmetric signing key.
#[derive(Debug, Clone, PartialEq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    P256(p256::PublicKey),
    P384(p384::PublicKey),
    P521(p521::PublicKey),
}

impl PublicKey {
    /// Build a public key from RSA (`n`, `e`) or EC (`crv`, `x`, `y`) JWK members.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self> {
        match jwk.base_kty() {
            "RSA" => {
                let n = decode_member(jwk.n.as_deref(), "n")?;
                let e = decode_member(jwk.e.as_deref(), "e")?;
                let key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
                    .map_err(|e| SigningError::InvalidKey(format!("RSA JWK: {}", e)))?;
                Ok(PublicKey::Rsa(key))
            }
            "EC" => {
                let crv = jwk
                    .crv
                    .as_deref()
                    .ok_or_else(|| SigningError::InvalidKey("EC JWK missing crv".to_string()))?;
                let curve = EcCurve::from_jwk_name(crv)
                    .ok_or_else(|| SigningError::InvalidKey(format!("unsupported curve {}", crv)))?;

                let mut sec1 = vec![0x04];
                sec1.extend(decode_member(jwk.x.as_deref(), "x")?);
                sec1.extend(decode_member(jwk.y.as_deref(), "y")?);

                let invalid = |e: p256::elliptic_curve::Error| {
                    SigningError::InvalidKey(format!("{} point: {}", crv, e))
                };
                Ok(match curve {
                    EcCurve::P256 => PublicKey::P256(p256::PublicKey::from_sec1_bytes(&sec1).map_err(invalid)?),
                    EcCurve::P384 => PublicKey::P384(p384::PublicKey::from_sec1_bytes(&sec1).map_err(invalid)?),
                    EcCurve::P521 => PublicKey::P521(p521::PublicKey::from_sec1_bytes(&sec1).map_err(invalid)?),
                })
            }
            other => Err(SigningError::InvalidKey(format!(
                "unsupported key type {}",
                other
            ))),
        }
    }

    pub fn family(&self) -> AlgorithmFamily {
        match self {
            PublicKey::Rsa(_) => AlgorithmFamily::Rsa,
            _ => AlgorithmFamily::Ecdsa,
        }
    }

    pub fn curve(&self) -> Option<EcCurve> {
        match self {
            PublicKey::Rsa(_) => None,
            PublicKey::P256(_) => Some(EcCurve::P256),
            PublicKey::P384(_) => Some(EcCurve::P384),
            PublicKey::P521(_) => Some(EcCurve::P521),
        }
    }

    /// Fails with `KeyMismatch` unless this key can carry `algorithm`.
    pub fn ensure_compatible(&self, algorithm: SigningAlgorithm) -> Result<()> {
        if algorithm.family() != self.family() {
            return Err(SigningError::key_mismatch(
                algorithm,
                format!("{:?} key cannot produce {} signatures", self.family(), algorithm),
            ));
        }
        if algorithm.curve() != self.curve() {
            return Err(SigningError::key_mismatch(
                algorithm,
                format!("curve {:?} does not match", self.curve()),
            ));
        }
        Ok(())
    }

    pub fn to_jwk(&self, algorithm: SigningAlgorithm, kid: &str) -> Result<Jwk> {
        let mut jwk = Jwk {
            kty: self.family().jwk_kty().to_string(),
            kid: Some(kid.to_string()),
            key_use: Some("sig".to_string()),
            alg: Some(algorithm.as_str().to_string()),
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
        };

        match self {
            PublicKey::Rsa(key) => {
                jwk.n = Some(base64_url_encode(&key.n().to_bytes_be()));
                jwk.e = Some(base64_url_encode(&key.e().to_bytes_be()));
            }
            PublicKey::P256(key) => {
                set_ec_coordinates(&mut jwk, EcCurve::P256, key.to_encoded_point(false).as_bytes())?
            }
            PublicKey::P384(key) => {
                set_ec_coordinates(&mut jwk, EcCurve::P384, key.to_encoded_point(false).as_bytes())?
            }
            PublicKey::P521(key) => {
                set_ec_coordinates(&mut jwk, EcCurve::P521, key.to_encoded_point(false).as_bytes())?
            }
        }

        Ok(jwk)
    }

    /// SubjectPublicKeyInfo PEM
    pub fn to_pem(&self) -> Result<String> {
        let pem = match self {
            PublicKey::Rsa(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::P256(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::P384(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::P521(key) => key.to_public_key_pem(LineEnding::LF),
        };
        pem.map_err(|e| SigningError::InvalidKey(format!("PEM encoding failed: {}", e)))
    }

    /// Verify a raw JWS signature. A malformed signature is reported as `Ok(false)`.
    pub fn verify(
        &self,
        algorithm: SigningAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        self.ensure_compatible(algorithm)?;

        let valid = match self {
            PublicKey::Rsa(key) => {
                let Ok(signature) = pkcs1v15::Signature::try_from(signature) else {
                    return Ok(false);
                };
                match algorithm.hash() {
                    HashAlgorithm::Sha256 => pkcs1v15::VerifyingKey::<Sha256>::new(key.clone())
                        .verify(message, &signature)
                        .is_ok(),
                    HashAlgorithm::Sha384 => pkcs1v15::VerifyingKey::<Sha384>::new(key.clone())
                        .verify(message, &signature)
                        .is_ok(),
                    HashAlgorithm::Sha512 => pkcs1v15::VerifyingKey::<Sha512>::new(key.clone())
                        .verify(message, &signature)
                        .is_ok(),
                }
            }
            PublicKey::P256(key) => {
                let Ok(signature) = p256::ecdsa::Signature::from_slice(signature) else {
                    return Ok(false);
                };
                p256::ecdsa::VerifyingKey::from(key)
                    .verify(message, &signature)
                    .is_ok()
            }
            PublicKey::P384(key) => {
                let Ok(signature) = p384::ecdsa::Signature::from_slice(signature) else {
                    return Ok(false);
                };
                p384::ecdsa::VerifyingKey::from(key)
                    .verify(message, &signature)
                    .is_ok()
            }
            PublicKey::P521(key) => {
                let Ok(signature) = p521::ecdsa::Signature::from_slice(signature) else {
                    return Ok(false);
                };
                let verifying_key =
                    p521::ecdsa::VerifyingKey::from_sec1_bytes(key.to_encoded_point(false).as_bytes())
                        .map_err(|e| SigningError::InvalidKey(format!("P-521 key: {}", e)))?;
                verifying_key.verify(message, &signature).is_ok()
            }
        };

        Ok(valid)
    }
}

fn decode_member(value: Option<&str>, name: &str) -> Result<Vec<u8>> {
    let value =
        value.ok_or_else(|| SigningError::InvalidKey(format!("JWK missing member {}", name)))?;
    base64_url_decode_lenient(value)
        .map_err(|e| SigningError::InvalidKey(format!("JWK member {} is not base64url: {}", name, e)))
}

// Uncompressed SEC1 point: 0x04 || x || y
fn set_ec_coordinates(jwk: &mut Jwk, curve: EcCurve, point: &[u8]) -> Result<()> {
    let coordinate_len = curve.coordinate_size();
    if point.len() != 1 + 2 * coordinate_len || point[0] != 0x04 {
        return Err(SigningError::InvalidKey("unexpected EC point encoding".to_string()));
    }
    jwk.crv = Some(curve.jwk_name().to_string());
    jwk.x = Some(base64_url_encode(&point[1..1 + coordinate_len]));
    jwk.y = Some(base64_url_encode(&point[1 + coordinate_len..]));
    Ok(())
}
