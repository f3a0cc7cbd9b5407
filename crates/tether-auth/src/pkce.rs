//! PKCE (Proof Key for Code Exchange) utilities.
//!
//! Implements S256 code challenge method per RFC 7636.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// PKCE verifier/challenge pair.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// The code verifier (random base64url string, 43 chars).
    pub verifier: String,
    /// The S256 code challenge (SHA-256 of verifier, base64url encoded).
    pub challenge: String,
}

/// Generate a cryptographically secure PKCE verifier and S256 challenge.
pub fn generate_pkce() -> PkcePair {
    let verifier = random_token();
    let challenge = challenge_for(&verifier);

    PkcePair {
        verifier,
        challenge,
    }
}

/// Generate an opaque state value, independent of the verifier.
pub fn generate_state() -> String {
    random_token()
}

/// S256 challenge for a verifier.
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_pkce_pair() {
        let pair = generate_pkce();

        // 32 bytes → 43 base64url chars, no padding
        assert_eq!(pair.verifier.len(), 43);
        assert_eq!(pair.challenge.len(), 43);
        assert_ne!(pair.verifier, pair.challenge);
    }

    #[test]
    fn challenge_is_sha256_of_verifier() {
        let pair = generate_pkce();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pair.verifier.as_bytes()));
        assert_eq!(pair.challenge, expected);
    }

    #[test]
    fn rfc7636_appendix_b_vector() {
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn state_is_independent_of_verifier() {
        let pair = generate_pkce();
        let state = generate_state();
        assert_eq!(state.len(), 43);
        assert_ne!(state, pair.verifier);
        assert_ne!(state, pair.challenge);
    }

    #[test]
    fn each_pair_is_unique() {
        assert_ne!(generate_pkce().verifier, generate_pkce().verifier);
    }
}
