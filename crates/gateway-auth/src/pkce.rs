//! PKCE verifier/challenge generation for authorization-code flows

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// A PKCE verifier and its S256 challenge
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

/// Generate a fresh 32-byte verifier and SHA-256 challenge
pub fn generate() -> PkcePair {
    let mut verifier_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut verifier_bytes);
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    PkcePair { verifier, challenge }
}

/// Random 16-byte `state` parameter
pub fn random_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_is_unpadded_base64url() {
        let pair = generate();
        // 32 bytes -> 43 base64url chars, no padding
        assert_eq!(pair.verifier.len(), 43);
        assert!(!pair.verifier.contains('='));
        assert!(!pair.verifier.contains('+'));
        assert!(!pair.verifier.contains('/'));
    }

    #[test]
    fn challenge_is_sha256_of_verifier() {
        let pair = generate();
        let mut hasher = Sha256::new();
        hasher.update(pair.verifier.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(hasher.finalize());
        assert_eq!(pair.challenge, expected);
    }

    #[test]
    fn state_values_differ() {
        assert_ne!(random_state(), random_state());
    }
}
