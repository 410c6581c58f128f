use crate::errors::SigningError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;

/// JWS signature algorithms supported by the signing backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    RS256,
    RS384,
    RS512,
    ES256,
    ES384,
    ES512,
    HS256,
    HS384,
    HS512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmFamily {
    Rsa,
    Ecdsa,
    Hmac,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl SigningAlgorithm {
    pub const ALL: [SigningAlgorithm; 9] = [
        SigningAlgorithm::RS256,
        SigningAlgorithm::RS384,
        SigningAlgorithm::RS512,
        SigningAlgorithm::ES256,
        SigningAlgorithm::ES384,
        SigningAlgorithm::ES512,
        SigningAlgorithm::HS256,
        SigningAlgorithm::HS384,
        SigningAlgorithm::HS512,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::RS256 => "RS256",
            SigningAlgorithm::RS384 => "RS384",
            SigningAlgorithm::RS512 => "RS512",
            SigningAlgorithm::ES256 => "ES256",
            SigningAlgorithm::ES384 => "ES384",
            SigningAlgorithm::ES512 => "ES512",
            SigningAlgorithm::HS256 => "HS256",
            SigningAlgorithm::HS384 => "HS384",
            SigningAlgorithm::HS512 => "HS512",
        }
    }

    pub fn family(&self) -> AlgorithmFamily {
        match self {
            SigningAlgorithm::RS256 | SigningAlgorithm::RS384 | SigningAlgorithm::RS512 => {
                AlgorithmFamily::Rsa
            }
            SigningAlgorithm::ES256 | SigningAlgorithm::ES384 | SigningAlgorithm::ES512 => {
                AlgorithmFamily::Ecdsa
            }
            SigningAlgorithm::HS256 | SigningAlgorithm::HS384 | SigningAlgorithm::HS512 => {
                AlgorithmFamily::Hmac
            }
        }
    }

    pub fn hash(&self) -> HashAlgorithm {
        match self {
            SigningAlgorithm::RS256 | SigningAlgorithm::ES256 | SigningAlgorithm::HS256 => {
                HashAlgorithm::Sha256
            }
            SigningAlgorithm::RS384 | SigningAlgorithm::ES384 | SigningAlgorithm::HS384 => {
                HashAlgorithm::Sha384
            }
            SigningAlgorithm::RS512 | SigningAlgorithm::ES512 | SigningAlgorithm::HS512 => {
                HashAlgorithm::Sha512
            }
        }
    }

    /// Curve required by an ECDSA algorithm. ES512 is paired with P-521.
    pub fn curve(&self) -> Option<EcCurve> {
        match self {
            SigningAlgorithm::ES256 => Some(EcCurve::P256),
            SigningAlgorithm::ES384 => Some(EcCurve::P384),
            SigningAlgorithm::ES512 => Some(EcCurve::P521),
            _ => None,
        }
    }

    pub fn is_symmetric(&self) -> bool {
        self.family() == AlgorithmFamily::Hmac
    }

    /// Hash `message` with the digest paired to this algorithm.
    pub fn digest(&self, message: &[u8]) -> Vec<u8> {
        self.hash().digest(message)
    }
}

impl HashAlgorithm {
    pub fn digest(&self, message: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(message).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(message).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(message).to_vec(),
        }
    }
}

impl AlgorithmFamily {
    /// JWK `kty` of keys in this family
    pub fn jwk_kty(&self) -> &'static str {
        match self {
            AlgorithmFamily::Rsa => "RSA",
            AlgorithmFamily::Ecdsa => "EC",
            AlgorithmFamily::Hmac => "oct",
        }
    }
}

impl EcCurve {
    /// Bytes per affine coordinate (and per signature half)
    pub fn coordinate_size(&self) -> usize {
        match self {
            EcCurve::P256 => 32,
            EcCurve::P384 => 48,
            EcCurve::P521 => 66,
        }
    }

    /// JWK `crv` name
    pub fn jwk_name(&self) -> &'static str {
        match self {
            EcCurve::P256 => "P-256",
            EcCurve::P384 => "P-384",
            EcCurve::P521 => "P-521",
        }
    }

    pub fn from_jwk_name(name: &str) -> Option<Self> {
        match name {
            "P-256" => Some(EcCurve::P256),
            "P-384" => Some(EcCurve::P384),
            "P-521" => Some(EcCurve::P521),
            _ => None,
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SigningAlgorithm::ALL
            .iter()
            .copied()
            .find(|alg| alg.as_str() == s)
            .ok_or_else(|| SigningError::UnsupportedAlgorithm(s.to_string()))
    }
}
