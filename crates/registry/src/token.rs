use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;

/// Minimum token entropy, in bytes, per spec §4.1 ("at least 32 bytes of
/// cryptographically secure randomness").
pub const DEFAULT_TOKEN_ENTROPY_BYTES: usize = 32;

/// Generates a base64url-encoded token with `entropy_bytes` of randomness
/// drawn from the OS CSPRNG.
///
/// # Test
///
/// ```
/// use registry::token::{generate_token, DEFAULT_TOKEN_ENTROPY_BYTES};
///
/// let a = generate_token(DEFAULT_TOKEN_ENTROPY_BYTES);
/// let b = generate_token(DEFAULT_TOKEN_ENTROPY_BYTES);
///
/// assert_ne!(a, b);
/// assert!(!a.contains('='));
/// ```
pub fn generate_token(entropy_bytes: usize) -> String {
    let mut buf = vec![0u8; entropy_bytes];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}
