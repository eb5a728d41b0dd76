//! Password key-stretching: iterated SHA-256 over the passphrase and salt.

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Stretches `password` with `salt` through `iterations` rounds of SHA-256,
/// as specified for Password Safe V3's stretched-key verifier and the K/L
/// cipher key unwrap. Matches `_stretch_password` of the reference
/// implementation: `k0 = SHA256(password || salt)`, then `k_{i+1} =
/// SHA256(k_i)` for `iterations` rounds, with the final digest being the
/// stretched key (the verifier is a further SHA-256 of that digest, computed
/// by the caller).
///
/// The returned buffer is wrapped in [`Zeroizing`] so it is wiped from memory
/// when dropped.
pub fn stretch(password: &[u8], salt: &[u8; 32], iterations: u32) -> Zeroizing<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(password);
    hasher.update(salt);
    let mut digest: [u8; 32] = hasher.finalize().into();

    for _ in 0..iterations {
        let mut hasher = Sha256::new();
        hasher.update(digest);
        digest = hasher.finalize().into();
    }

    Zeroizing::new(digest)
}

/// Computes the password verifier stored in the vault preamble: one more
/// round of SHA-256 applied to the stretched key.
pub fn verifier(stretched_key: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(stretched_key);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stretch_is_deterministic() {
        let salt = [0x5Au8; 32];
        let a = stretch(b"hunter2", &salt, 2048);
        let b = stretch(b"hunter2", &salt, 2048);
        assert_eq!(*a, *b);
    }

    #[test]
    fn stretch_differs_by_password_salt_and_iterations() {
        let salt = [0x5Au8; 32];
        let base = stretch(b"hunter2", &salt, 2048);
        assert_ne!(*base, *stretch(b"hunter3", &salt, 2048));
        assert_ne!(*base, *stretch(b"hunter2", &[0x5Bu8; 32], 2048));
        assert_ne!(*base, *stretch(b"hunter2", &salt, 2049));
    }

    #[test]
    fn verifier_is_one_more_round() {
        let salt = [0x11u8; 32];
        let stretched = stretch(b"correct horse", &salt, 100);
        let v1 = verifier(&stretched);
        let v2 = verifier(&stretched);
        assert_eq!(v1, v2);
        assert_ne!(v1, *stretched);
    }
}
