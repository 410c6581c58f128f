use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

/// Base64url encode without padding
pub fn base64_url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Strict base64url decode: padding and non-alphabet characters are errors.
pub fn base64_url_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(data)
}

/// Base64url decode, tolerating trailing padding. Only for values produced by
/// external systems (key vault responses, JWK members).
pub fn base64_url_decode_lenient(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(data.trim_end_matches('='))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_decode_rejects_padding() {
        assert_eq!(base64_url_decode("AQI").unwrap(), vec![1, 2]);
        assert!(base64_url_decode("AQI=").is_err());
        assert!(base64_url_decode("AQ+/").is_err());
    }

    #[test]
    fn test_lenient_decode_accepts_padding() {
        assert_eq!(base64_url_decode_lenient("AQI=").unwrap(), vec![1, 2]);
        assert_eq!(base64_url_decode_lenient("AQI").unwrap(), vec![1, 2]);
    }
}
