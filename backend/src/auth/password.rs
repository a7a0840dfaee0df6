//! Salted, iterated SHA-256 password hashing. Stored form is
//! `hex(salt)$hex(digest)`.

use rand::RngCore;
use sha2::{Digest, Sha256};

const SALT_LEN: usize = 16;
const ITERATIONS: u32 = 10_000;

pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    let salt_hex = hex::encode(salt);
    let digest = iterated_digest(&salt_hex, password);
    format!("{salt_hex}${digest}")
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt_hex, expected)) => iterated_digest(salt_hex, password) == expected,
        None => false,
    }
}

fn iterated_digest(salt_hex: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt_hex.as_bytes());
    hasher.update(password.as_bytes());
    let mut digest = hasher.finalize();
    for _ in 1..ITERATIONS {
        digest = Sha256::digest(digest);
    }
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_password_verifies() {
        let stored = hash_password("pw123456");
        assert!(verify_password("pw123456", &stored));
    }

    #[test]
    fn wrong_password_is_rejected() {
        let stored = hash_password("pw123456");
        assert!(!verify_password("pw1234567", &stored));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let a = hash_password("same");
        let b = hash_password("same");
        assert_ne!(a, b);
        assert!(verify_password("same", &a));
        assert!(verify_password("same", &b));
    }

    #[test]
    fn malformed_stored_value_never_verifies() {
        assert!(!verify_password("anything", "no-separator-here"));
        assert!(!verify_password("anything", ""));
    }
}
