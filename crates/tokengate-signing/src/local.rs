use crate::algorithm::{AlgorithmFamily, EcCurve, HashAlgorithm, SigningAlgorithm};
use crate::backend::SigningBackend;
use crate::errors::{Result, SigningError};
use crate::jwk::Jwk;
use crate::public_key::PublicKey;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sha2::{Sha256, Sha384, Sha512};
use std::fmt;
use std::path::Path;
use zeroize::Zeroizing;

/// Smallest HMAC secret accepted, in bytes.
pub const MIN_HMAC_SECRET_LEN: usize = 32;

/// Smallest RSA modulus accepted, in bits.
pub const MIN_RSA_BITS: usize = 2048;

/// Key material handed to [`LocalSigningBackend::new`].
#[derive(Clone)]
pub enum KeyMaterial {
    /// PKCS#8, PKCS#1 (RSA) or SEC1 (EC) private key PEM.
    Pem(Zeroizing<String>),
    /// Shared secret for HMAC algorithms.
    Secret(Zeroizing<Vec<u8>>),
}

impl KeyMaterial {
    pub fn pem(pem: impl Into<String>) -> Self {
        KeyMaterial::Pem(Zeroizing::new(pem.into()))
    }

    pub fn secret(secret: impl Into<Vec<u8>>) -> Self {
        KeyMaterial::Secret(Zeroizing::new(secret.into()))
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMaterial::Pem(_) => f.write_str("KeyMaterial::Pem(<redacted>)"),
            KeyMaterial::Secret(_) => f.write_str("KeyMaterial::Secret(<redacted>)"),
        }
    }
}

enum LocalKey {
    Rsa(RsaPrivateKey),
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    P521(p521::ecdsa::SigningKey),
    Hmac(Zeroizing<Vec<u8>>),
}

/// Signs with key material held in process memory.
pub struct LocalSigningBackend {
    algorithm: SigningAlgorithm,
    key_id: String,
    key: LocalKey,
    public_key: Option<PublicKey>,
}

impl LocalSigningBackend {
    /// Load key material for `algorithm`.
    ///
    /// When `key_id` is `None` asymmetric keys use their RFC 7638 thumbprint
    /// and HMAC keys use the lowercased algorithm name.
    pub fn new(
        algorithm: SigningAlgorithm,
        key_id: Option<String>,
        material: KeyMaterial,
    ) -> Result<Self> {
        let (key, public_key) = match (algorithm.family(), material) {
            (AlgorithmFamily::Hmac, KeyMaterial::Secret(secret)) => {
                if secret.len() < MIN_HMAC_SECRET_LEN {
                    return Err(SigningError::InvalidKey(format!(
                        "HMAC secret must be at least {} bytes",
                        MIN_HMAC_SECRET_LEN
                    )));
                }
                (LocalKey::Hmac(secret), None)
            }
            (AlgorithmFamily::Hmac, KeyMaterial::Pem(_)) => {
                return Err(SigningError::key_mismatch(
                    algorithm,
                    "HMAC algorithms need a shared secret, not a PEM key",
                ))
            }
            (AlgorithmFamily::Rsa, KeyMaterial::Pem(pem)) => {
                let private = parse_rsa_pem(algorithm, &pem)?;
                let public = PublicKey::Rsa(private.to_public_key());
                (LocalKey::Rsa(private), Some(public))
            }
            (AlgorithmFamily::Ecdsa, KeyMaterial::Pem(pem)) => parse_ec_pem(algorithm, &pem)?,
            (_, KeyMaterial::Secret(_)) => {
                return Err(SigningError::MissingKeyMaterial(format!(
                    "{} needs a private key PEM",
                    algorithm
                )))
            }
        };

        let key_id = match key_id {
            Some(kid) if !kid.is_empty() => kid,
            _ => match &public_key {
                Some(public) => public
                    .to_jwk(algorithm, "")?
                    .thumbprint()
                    .unwrap_or_else(|| algorithm.as_str().to_lowercase()),
                None => algorithm.as_str().to_lowercase(),
            },
        };

        tracing::info!(
            algorithm = %algorithm,
            key_id = %key_id,
            "Loaded local signing key"
        );

        Ok(Self {
            algorithm,
            key_id,
            key,
            public_key,
        })
    }

    pub fn from_pem(algorithm: SigningAlgorithm, key_id: Option<String>, pem: &str) -> Result<Self> {
        Self::new(algorithm, key_id, KeyMaterial::pem(pem))
    }

    pub fn from_pem_file(
        algorithm: SigningAlgorithm,
        key_id: Option<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| {
            SigningError::MissingKeyMaterial(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::new(algorithm, key_id, KeyMaterial::Pem(Zeroizing::new(pem)))
    }

    pub fn from_secret(
        algorithm: SigningAlgorithm,
        key_id: Option<String>,
        secret: impl Into<Vec<u8>>,
    ) -> Result<Self> {
        Self::new(algorithm, key_id, KeyMaterial::secret(secret))
    }

    fn sign_sync(&self, message: &[u8]) -> Result<Vec<u8>> {
        let failed = |e: rsa::signature::Error| SigningError::SignatureFailed(e.to_string());

        match &self.key {
            LocalKey::Rsa(key) => match self.algorithm.hash() {
                HashAlgorithm::Sha256 => Ok(pkcs1v15::SigningKey::<Sha256>::new(key.clone())
                    .try_sign(message)
                    .map_err(failed)?
                    .to_vec()),
                HashAlgorithm::Sha384 => Ok(pkcs1v15::SigningKey::<Sha384>::new(key.clone())
                    .try_sign(message)
                    .map_err(failed)?
                    .to_vec()),
                HashAlgorithm::Sha512 => Ok(pkcs1v15::SigningKey::<Sha512>::new(key.clone())
                    .try_sign(message)
                    .map_err(failed)?
                    .to_vec()),
            },
            LocalKey::P256(key) => {
                let signature: p256::ecdsa::Signature = key.try_sign(message).map_err(failed)?;
                Ok(signature.to_bytes().to_vec())
            }
            LocalKey::P384(key) => {
                let signature: p384::ecdsa::Signature = key.try_sign(message).map_err(failed)?;
                Ok(signature.to_bytes().to_vec())
            }
            LocalKey::P521(key) => {
                let signature: p521::ecdsa::Signature = key.try_sign(message).map_err(failed)?;
                Ok(signature.to_bytes().to_vec())
            }
            LocalKey::Hmac(secret) => hmac_tag(self.algorithm, secret, message),
        }
    }
}

#[async_trait]
impl SigningBackend for LocalSigningBackend {
    fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.sign_sync(message)
    }

    async fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool> {
        match (&self.key, &self.public_key) {
            (LocalKey::Hmac(secret), _) => {
                let mut mac = new_hmac(self.algorithm, secret)?;
                mac.update(message);
                Ok(mac.verify(signature))
            }
            (_, Some(public)) => public.verify(self.algorithm, message, signature),
            (_, None) => Err(SigningError::MissingKeyMaterial(
                "public key not available".to_string(),
            )),
        }
    }

    async fn public_key_jwk(&self) -> Result<Option<Jwk>> {
        self.public_key
            .as_ref()
            .map(|public| public.to_jwk(self.algorithm, &self.key_id))
            .transpose()
    }

    async fn public_key_pem(&self) -> Result<Option<String>> {
        self.public_key.as_ref().map(PublicKey::to_pem).transpose()
    }
}

impl fmt::Debug for LocalSigningBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigningBackend")
            .field("algorithm", &self.algorithm)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

fn parse_rsa_pem(algorithm: SigningAlgorithm, pem: &str) -> Result<RsaPrivateKey> {
    let key = RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|_| SigningError::key_mismatch(algorithm, "PEM does not hold an RSA private key"))?;

    let bits = key.size() * 8;
    if bits < MIN_RSA_BITS {
        return Err(SigningError::InvalidKey(format!(
            "RSA key is {} bits, at least {} required",
            bits, MIN_RSA_BITS
        )));
    }
    Ok(key)
}

fn parse_ec_pem(algorithm: SigningAlgorithm, pem: &str) -> Result<(LocalKey, Option<PublicKey>)> {
    let mismatch = || {
        SigningError::key_mismatch(
            algorithm,
            format!(
                "PEM does not hold a {} private key",
                algorithm.curve().map(|c| c.jwk_name()).unwrap_or("EC")
            ),
        )
    };

    match algorithm.curve() {
        Some(EcCurve::P256) => {
            let secret = p256::SecretKey::from_pkcs8_pem(pem)
                .or_else(|_| p256::SecretKey::from_sec1_pem(pem))
                .map_err(|_| mismatch())?;
            let signing = p256::ecdsa::SigningKey::from_slice(&secret.to_bytes())
                .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
            let public = PublicKey::P256(secret.public_key());
            Ok((LocalKey::P256(signing), Some(public)))
        }
        Some(EcCurve::P384) => {
            let secret = p384::SecretKey::from_pkcs8_pem(pem)
                .or_else(|_| p384::SecretKey::from_sec1_pem(pem))
                .map_err(|_| mismatch())?;
            let signing = p384::ecdsa::SigningKey::from_slice(&secret.to_bytes())
                .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
            let public = PublicKey::P384(secret.public_key());
            Ok((LocalKey::P384(signing), Some(public)))
        }
        Some(EcCurve::P521) => {
            let secret = p521::SecretKey::from_pkcs8_pem(pem)
                .or_else(|_| p521::SecretKey::from_sec1_pem(pem))
                .map_err(|_| mismatch())?;
            let signing = p521::ecdsa::SigningKey::from_slice(&secret.to_bytes())
                .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
            let public = PublicKey::P521(secret.public_key());
            Ok((LocalKey::P521(signing), Some(public)))
        }
        None => Err(SigningError::UnsupportedAlgorithm(algorithm.to_string())),
    }
}

enum HmacState {
    Sha256(Hmac<Sha256>),
    Sha384(Hmac<Sha384>),
    Sha512(Hmac<Sha512>),
}

impl HmacState {
    fn update(&mut self, message: &[u8]) {
        match self {
            HmacState::Sha256(mac) => mac.update(message),
            HmacState::Sha384(mac) => mac.update(message),
            HmacState::Sha512(mac) => mac.update(message),
        }
    }

    // Constant-time tag comparison
    fn verify(self, tag: &[u8]) -> bool {
        match self {
            HmacState::Sha256(mac) => mac.verify_slice(tag).is_ok(),
            HmacState::Sha384(mac) => mac.verify_slice(tag).is_ok(),
            HmacState::Sha512(mac) => mac.verify_slice(tag).is_ok(),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            HmacState::Sha256(mac) => mac.finalize().into_bytes().to_vec(),
            HmacState::Sha384(mac) => mac.finalize().into_bytes().to_vec(),
            HmacState::Sha512(mac) => mac.finalize().into_bytes().to_vec(),
        }
    }
}

fn new_hmac(algorithm: SigningAlgorithm, secret: &[u8]) -> Result<HmacState> {
    let invalid = |e: hmac::digest::InvalidLength| SigningError::InvalidKey(e.to_string());
    Ok(match algorithm.hash() {
        HashAlgorithm::Sha256 => {
            HmacState::Sha256(Hmac::<Sha256>::new_from_slice(secret).map_err(invalid)?)
        }
        HashAlgorithm::Sha384 => {
            HmacState::Sha384(Hmac::<Sha384>::new_from_slice(secret).map_err(invalid)?)
        }
        HashAlgorithm::Sha512 => {
            HmacState::Sha512(Hmac::<Sha512>::new_from_slice(secret).map_err(invalid)?)
        }
    })
}

fn hmac_tag(algorithm: SigningAlgorithm, secret: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = new_hmac(algorithm, secret)?;
    mac.update(message);
    Ok(mac.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSA_PEM: &str = include_str!("../tests/fixtures/rsa_private.pem");
    const RSA_PKCS1_PEM: &str = include_str!("../tests/fixtures/rsa_private_pkcs1.pem");
    const RSA_PUBLIC_PEM: &str = include_str!("../tests/fixtures/rsa_public.pem");
    const P256_PEM: &str = include_str!("../tests/fixtures/ec_p256_private.pem");
    const P384_PEM: &str = include_str!("../tests/fixtures/ec_p384_private.pem");
    const P521_PEM: &str = include_str!("../tests/fixtures/ec_p521_private.pem");
    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn backend(algorithm: SigningAlgorithm) -> LocalSigningBackend {
        let pem = match algorithm.family() {
            AlgorithmFamily::Hmac => {
                return LocalSigningBackend::from_secret(algorithm, Some("k1".into()), SECRET)
                    .unwrap()
            }
            AlgorithmFamily::Rsa => RSA_PEM,
            AlgorithmFamily::Ecdsa => match algorithm.curve().unwrap() {
                EcCurve::P256 => P256_PEM,
                EcCurve::P384 => P384_PEM,
                EcCurve::P521 => P521_PEM,
            },
        };
        LocalSigningBackend::from_pem(algorithm, Some("k1".into()), pem).unwrap()
    }

    #[tokio::test]
    async fn test_sign_verify_every_algorithm() {
        for algorithm in SigningAlgorithm::ALL {
            let backend = backend(algorithm);
            let signature = backend.sign(b"header.payload").await.unwrap();
            assert!(!signature.is_empty(), "{} produced empty signature", algorithm);
            assert!(
                backend.verify(b"header.payload", &signature).await.unwrap(),
                "{} signature did not verify",
                algorithm
            );
            assert!(
                !backend.verify(b"header.payloaX", &signature).await.unwrap(),
                "{} accepted a tampered message",
                algorithm
            );
        }
    }

    #[tokio::test]
    async fn test_ecdsa_signatures_are_fixed_width() {
        let cases = [
            (SigningAlgorithm::ES256, 64),
            (SigningAlgorithm::ES384, 96),
            (SigningAlgorithm::ES512, 132),
        ];
        for (algorithm, len) in cases {
            let signature = backend(algorithm).sign(b"msg").await.unwrap();
            assert_eq!(signature.len(), len, "{}", algorithm);
        }
    }

    #[tokio::test]
    async fn test_truncated_signature_is_rejected_not_error() {
        let backend = backend(SigningAlgorithm::RS256);
        let signature = backend.sign(b"msg").await.unwrap();
        assert!(!backend.verify(b"msg", &signature[..10]).await.unwrap());

        let hmac = self::backend(SigningAlgorithm::HS256);
        let tag = hmac.sign(b"msg").await.unwrap();
        assert!(!hmac.verify(b"msg", &tag[..31]).await.unwrap());
    }

    #[tokio::test]
    async fn test_pkcs1_and_pkcs8_load_the_same_key() {
        let pkcs8 = LocalSigningBackend::from_pem(SigningAlgorithm::RS256, None, RSA_PEM).unwrap();
        let pkcs1 =
            LocalSigningBackend::from_pem(SigningAlgorithm::RS256, None, RSA_PKCS1_PEM).unwrap();
        assert_eq!(
            pkcs8.public_key_jwk().await.unwrap(),
            pkcs1.public_key_jwk().await.unwrap()
        );
        assert_eq!(pkcs8.key_id(), pkcs1.key_id());
    }

    #[tokio::test]
    async fn test_public_key_pem_matches_openssl_export() {
        let backend = backend(SigningAlgorithm::RS256);
        let pem = backend.public_key_pem().await.unwrap().unwrap();
        assert_eq!(pem.trim(), RSA_PUBLIC_PEM.trim());
    }

    #[tokio::test]
    async fn test_default_key_id_is_thumbprint() {
        let backend = LocalSigningBackend::from_pem(SigningAlgorithm::ES256, None, P256_PEM).unwrap();
        let jwk = backend.public_key_jwk().await.unwrap().unwrap();
        assert_eq!(Some(backend.key_id().to_string()), jwk.thumbprint());
        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.crv.as_deref(), Some("P-256"));
        assert_eq!(jwk.alg.as_deref(), Some("ES256"));
    }

    #[tokio::test]
    async fn test_hmac_has_no_public_key() {
        let backend = backend(SigningAlgorithm::HS256);
        assert!(backend.public_key_jwk().await.unwrap().is_none());
        assert!(backend.public_key_pem().await.unwrap().is_none());
        assert_eq!(backend.key_id(), "k1");
    }

    #[test]
    fn test_short_hmac_secret_rejected() {
        let err = LocalSigningBackend::from_secret(SigningAlgorithm::HS256, None, b"short".to_vec())
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_key_algorithm_mismatch_is_configuration_error() {
        let err = LocalSigningBackend::from_pem(SigningAlgorithm::ES256, None, RSA_PEM).unwrap_err();
        assert!(matches!(err, SigningError::KeyMismatch { .. }));

        let err = LocalSigningBackend::from_pem(SigningAlgorithm::ES384, None, P256_PEM).unwrap_err();
        assert!(matches!(err, SigningError::KeyMismatch { .. }));

        let err = LocalSigningBackend::from_pem(SigningAlgorithm::RS256, None, P256_PEM).unwrap_err();
        assert!(err.is_configuration());

        let err = LocalSigningBackend::from_secret(SigningAlgorithm::RS256, None, SECRET).unwrap_err();
        assert!(matches!(err, SigningError::MissingKeyMaterial(_)));
    }

    #[test]
    fn test_missing_pem_file() {
        let err = LocalSigningBackend::from_pem_file(
            SigningAlgorithm::RS256,
            None,
            "/nonexistent/key.pem",
        )
        .unwrap_err();
        assert!(matches!(err, SigningError::MissingKeyMaterial(_)));
    }

    #[tokio::test]
    async fn test_health_check_signs_probe() {
        assert!(backend(SigningAlgorithm::ES384).health_check().await);
    }
}
