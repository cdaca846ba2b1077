// ABOUTME: PKCE (Proof Key for Code Exchange) implementation for OAuth 2.0
// ABOUTME: Generates code verifiers, S256 challenges, and CSRF state values

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::{
    error::{AuthError, AuthResult},
    oauth::types::PkceChallenge,
};

/// RFC 7636 §4.1 unreserved characters
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

const VERIFIER_LENGTH: usize = 64;
const MIN_VERIFIER_LENGTH: usize = 43;
const MAX_VERIFIER_LENGTH: usize = 128;

const STATE_LENGTH: usize = 32;

pub const CHALLENGE_METHOD_S256: &str = "S256";

/// Generate a fresh verifier and its S256 challenge
pub fn generate_pkce_challenge() -> AuthResult<PkceChallenge> {
    let code_verifier = generate_code_verifier(VERIFIER_LENGTH)?;
    let code_challenge = compute_code_challenge(&code_verifier);

    Ok(PkceChallenge {
        code_verifier,
        code_challenge,
        code_challenge_method: CHALLENGE_METHOD_S256.to_string(),
    })
}

fn generate_code_verifier(length: usize) -> AuthResult<String> {
    if !(MIN_VERIFIER_LENGTH..=MAX_VERIFIER_LENGTH).contains(&length) {
        return Err(AuthError::Pkce(format!(
            "Invalid code verifier length: {}",
            length
        )));
    }

    let mut rng = rand::thread_rng();
    let verifier = (0..length)
        .map(|_| VERIFIER_CHARSET[rng.gen_range(0..VERIFIER_CHARSET.len())] as char)
        .collect();

    Ok(verifier)
}

/// base64url(SHA-256(verifier)) without padding
pub fn compute_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Check a verifier against a challenge the way the authorization server does
pub fn verify_pkce_challenge(verifier: &str, challenge: &str) -> bool {
    compute_code_challenge(verifier) == challenge
}

/// Random CSRF state; also the key of the pending flow
pub fn generate_state() -> String {
    nanoid::nanoid!(STATE_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_uses_unreserved_charset() {
        let verifier = generate_code_verifier(VERIFIER_LENGTH).unwrap();
        assert_eq!(verifier.len(), VERIFIER_LENGTH);
        assert!(verifier.bytes().all(|b| VERIFIER_CHARSET.contains(&b)));
    }

    #[test]
    fn test_verifier_length_bounds() {
        assert!(generate_code_verifier(42).is_err());
        assert!(generate_code_verifier(129).is_err());
        assert_eq!(generate_code_verifier(43).unwrap().len(), 43);
        assert_eq!(generate_code_verifier(128).unwrap().len(), 128);
    }

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            compute_code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_generate_pkce_challenge() {
        let pkce = generate_pkce_challenge().unwrap();
        assert_eq!(pkce.code_challenge_method, "S256");
        assert!(verify_pkce_challenge(&pkce.code_verifier, &pkce.code_challenge));
        assert!(!verify_pkce_challenge("wrong_verifier", &pkce.code_challenge));
        assert!(!pkce.code_challenge.contains('='));
    }

    #[test]
    fn test_state_is_random() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), STATE_LENGTH);
        assert_ne!(a, b);
    }
}
