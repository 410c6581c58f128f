use crate::utils::base64_url_encode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// JSON Web Key (RFC 7517), public members only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// JWK Set document as served from `/.well-known/jwks.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl Jwk {
    /// Key type with vendor suffixes removed ("RSA-HSM" becomes "RSA").
    pub fn base_kty(&self) -> &str {
        self.kty.strip_suffix("-HSM").unwrap_or(&self.kty)
    }

    /// RFC 7638 thumbprint, base64url encoded.
    pub fn thumbprint(&self) -> Option<String> {
        let canonical = match self.base_kty() {
            "RSA" => format!(
                r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
                self.e.as_deref()?,
                self.n.as_deref()?
            ),
            "EC" => format!(
                r#"{{"crv":"{}","kty":"EC","x":"{}","y":"{}"}}"#,
                self.crv.as_deref()?,
                self.x.as_deref()?,
                self.y.as_deref()?
            ),
            _ => return None,
        };
        Some(base64_url_encode(&Sha256::digest(canonical.as_bytes())))
    }
}

impl JwkSet {
    pub fn new(keys: Vec<Jwk>) -> Self {
        Self { keys }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Find a key by `kid`. Without a kid, a single-key set is unambiguous.
    pub fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
            None if self.keys.len() == 1 => self.keys.first(),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsa_jwk(kid: &str) -> Jwk {
        Jwk {
            kty: "RSA".to_string(),
            kid: Some(kid.to_string()),
            key_use: Some("sig".to_string()),
            alg: Some("RS256".to_string()),
            n: Some("0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw".to_string()),
            e: Some("AQAB".to_string()),
            crv: None,
            x: None,
            y: None,
        }
    }

    #[test]
    fn test_thumbprint_matches_rfc7638_example() {
        let jwk = rsa_jwk("2011-04-29");
        assert_eq!(
            jwk.thumbprint().unwrap(),
            "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"
        );
    }

    #[test]
    fn test_serializes_use_and_skips_missing_members() {
        let json = serde_json::to_value(rsa_jwk("k1")).unwrap();
        assert_eq!(json["use"], "sig");
        assert!(json.get("crv").is_none());
        assert!(json.get("key_use").is_none());
    }

    #[test]
    fn test_find_by_kid() {
        let set = JwkSet::new(vec![rsa_jwk("a"), rsa_jwk("b")]);
        assert_eq!(set.find(Some("b")).unwrap().kid.as_deref(), Some("b"));
        assert!(set.find(Some("c")).is_none());
        assert!(set.find(None).is_none());

        let single = JwkSet::new(vec![rsa_jwk("only")]);
        assert!(single.find(None).is_some());
    }

    #[test]
    fn test_base_kty_strips_hsm_suffix() {
        let mut jwk = rsa_jwk("a");
        jwk.kty = "RSA-HSM".to_string();
        assert_eq!(jwk.base_kty(), "RSA");
    }
}
