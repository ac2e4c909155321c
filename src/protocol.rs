use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generates a random `state` value binding the callback to this browser.
///
/// Returns a 22-character URL-safe string (16 random bytes → base64url).
#[must_use]
pub fn generate_state() -> String {
    let random_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Generates a random `nonce` that the ID token must echo back.
///
/// Returns a 43-character URL-safe string (32 random bytes → base64url).
#[must_use]
pub fn generate_nonce() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Computes the OIDC `c_hash` of an authorization code for RS256-signed ID tokens.
///
/// `c_hash = BASE64URL(left-most 128 bits of SHA256(code))`
#[must_use]
pub fn code_hash(code: &str) -> String {
    let hash = Sha256::digest(code.as_bytes());
    URL_SAFE_NO_PAD.encode(&hash[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_length() {
        let state = generate_state();
        assert_eq!(state.len(), 22);
    }

    #[test]
    fn test_state_uniqueness() {
        let s1 = generate_state();
        let s2 = generate_state();
        assert_ne!(s1, s2, "states should be unique");
    }

    #[test]
    fn test_nonce_url_safe() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 43);
        assert!(
            nonce
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "nonce should be URL-safe: {}",
            nonce
        );
    }

    #[test]
    fn test_nonce_uniqueness() {
        assert_ne!(generate_nonce(), generate_nonce());
    }

    #[test]
    fn test_code_hash_deterministic() {
        assert_eq!(code_hash("code-1"), code_hash("code-1"));
        assert_ne!(code_hash("code-1"), code_hash("code-2"));
    }

    #[test]
    fn test_code_hash_matches_core_spec_example() {
        // OpenID Connect Core 1.0, Appendix A.4
        assert_eq!(
            code_hash("Qcb0Orv1zh30vL1MPRsbm-diHiMwcLyZvn1arpZv-Jxf_11jnpEX3Tgfvk"),
            "LDktKdoQak3Pk0cnXxCltA"
        );
    }
}
