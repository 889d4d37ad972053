//! PKCE (Proof Key for Code Exchange) parameter generation.
//!
//! Each login attempt gets a fresh [`PkceParameters`] value: a code verifier,
//! its S256 challenge, and independent random `state` and `nonce` values.
//! The parameters live only in memory for the duration of the attempt.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};

/// The only challenge method this client sends.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Random bytes behind the code verifier (43 base64url characters).
const VERIFIER_BYTES: usize = 32;

/// Random bytes behind `state` and `nonce`.
const STATE_BYTES: usize = 16;

/// Parameters for one authorization request.
#[derive(Clone)]
pub struct PkceParameters {
    /// High-entropy secret sent only to the token endpoint
    pub code_verifier: String,

    /// base64url(SHA-256(code_verifier))
    pub code_challenge: String,

    /// Always "S256"
    pub code_challenge_method: &'static str,

    /// Opaque CSRF value round-tripped through the redirect
    pub state: String,

    /// OIDC replay protection value
    pub nonce: Option<String>,
}

impl std::fmt::Debug for PkceParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceParameters")
            .field("code_verifier", &"[REDACTED]")
            .field("code_challenge", &self.code_challenge)
            .field("code_challenge_method", &self.code_challenge_method)
            .field("state", &self.state)
            .field("nonce", &self.nonce)
            .finish()
    }
}

impl PkceParameters {
    /// Generate parameters from the operating system CSPRNG.
    pub fn generate() -> Self {
        Self::generate_with(&mut OsRng)
    }

    /// Generate parameters from the given source.
    ///
    /// If the source fails, a clock-seeded pseudo-random generator is used
    /// instead so login stays available.
    pub fn generate_with<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; VERIFIER_BYTES + 2 * STATE_BYTES];
        if let Err(e) = rng.try_fill_bytes(&mut bytes) {
            tracing::warn!(error = %e, "Secure random source failed, using fallback generator");
            fallback_rng().fill_bytes(&mut bytes);
        }
        let (verifier_bytes, rest) = bytes.split_at(VERIFIER_BYTES);
        let (state_bytes, nonce_bytes) = rest.split_at(STATE_BYTES);

        let code_verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
        let code_challenge = code_challenge(&code_verifier);

        Self {
            code_verifier,
            code_challenge,
            code_challenge_method: CODE_CHALLENGE_METHOD,
            state: URL_SAFE_NO_PAD.encode(state_bytes),
            nonce: Some(URL_SAFE_NO_PAD.encode(nonce_bytes)),
        }
    }

    /// Drop the nonce for providers that reject it.
    pub fn without_nonce(mut self) -> Self {
        self.nonce = None;
        self
    }

    /// Recompute the challenge from the verifier and compare.
    pub fn verify_challenge(&self) -> bool {
        code_challenge(&self.code_verifier) == self.code_challenge
    }
}

/// Compute the S256 code challenge for a verifier.
///
/// code_challenge = BASE64URL-NOPAD(SHA256(ASCII(code_verifier)))
pub fn code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

fn fallback_rng() -> StdRng {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    StdRng::seed_from_u64(nanos ^ u64::from(std::process::id()).rotate_left(32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Random source that always fails.
    struct BrokenRng;

    impl RngCore for BrokenRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::other("entropy unavailable")))
        }
    }

    fn is_url_safe(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn test_verifier_length_and_alphabet() {
        for _ in 0..32 {
            let params = PkceParameters::generate();
            assert!((43..=128).contains(&params.code_verifier.len()));
            assert!(is_url_safe(&params.code_verifier));
        }
    }

    #[test]
    fn test_challenge_is_s256_of_verifier() {
        let params = PkceParameters::generate();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(params.code_verifier.as_bytes()));

        assert_eq!(params.code_challenge, expected);
        assert_eq!(params.code_challenge_method, "S256");
        assert!(params.verify_challenge());
        assert!(!params.code_challenge.contains('='));
    }

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_state_and_nonce_are_independent_and_unique() {
        let mut seen = HashSet::new();
        for _ in 0..64 {
            let params = PkceParameters::generate();
            let nonce = params.nonce.clone().unwrap_or_default();

            // 16 bytes base64url encoded without padding
            assert_eq!(params.state.len(), 22);
            assert_eq!(nonce.len(), 22);
            assert_ne!(params.state, nonce);

            assert!(seen.insert(params.state));
            assert!(seen.insert(nonce));
        }
    }

    #[test]
    fn test_broken_source_falls_back() {
        let params = PkceParameters::generate_with(&mut BrokenRng);

        assert_eq!(params.code_verifier.len(), 43);
        assert!(params.verify_challenge());
        assert_ne!(params.code_verifier, URL_SAFE_NO_PAD.encode([0u8; 32]));
        assert_ne!(Some(params.state.clone()), params.nonce);
    }

    #[test]
    fn test_debug_redacts_verifier() {
        let params = PkceParameters::generate();
        let debug = format!("{:?}", params);
        assert!(!debug.contains(&params.code_verifier));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_without_nonce() {
        let params = PkceParameters::generate().without_nonce();
        assert!(params.nonce.is_none());
    }
}
