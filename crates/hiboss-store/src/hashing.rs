//! PBKDF2-HMAC-SHA512 token hashing, pinned exactly:
//! 100,000 iterations, 64-byte derived key, 16-byte random salt, encoded as
//! `hex(salt):hex(key)`.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha512;

const ITERATIONS: u32 = 100_000;
const KEY_LEN: usize = 64;
const SALT_LEN: usize = 16;

/// Hash `plaintext` with a freshly generated random salt, returning the
/// `salt:hex` encoded string to persist.
pub fn hash_token(plaintext: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    encode(&salt, plaintext)
}

/// Verify `plaintext` against a stored `salt:hex` hash in constant time.
pub fn verify_token(plaintext: &str, stored: &str) -> bool {
    let Some((salt_hex, key_hex)) = stored.split_once(':') else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let Ok(expected_key) = hex::decode(key_hex) else {
        return false;
    };

    let mut derived = vec![0u8; expected_key.len().max(KEY_LEN)];
    pbkdf2_hmac::<Sha512>(plaintext.as_bytes(), &salt, ITERATIONS, &mut derived[..KEY_LEN.min(derived.len())]);

    constant_time_eq(&derived[..expected_key.len()], &expected_key)
}

fn encode(salt: &[u8], plaintext: &str) -> String {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha512>(plaintext.as_bytes(), salt, ITERATIONS, &mut key);
    format!("{}:{}", hex::encode(salt), hex::encode(key))
}

/// Fixed-time byte comparison — never short-circuits on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_roundtrips() {
        let hashed = hash_token("s3cr3t");
        assert!(verify_token("s3cr3t", &hashed));
    }

    #[test]
    fn wrong_plaintext_fails() {
        let hashed = hash_token("s3cr3t");
        assert!(!verify_token("wrong", &hashed));
    }

    #[test]
    fn malformed_stored_value_fails_closed() {
        assert!(!verify_token("anything", "not-a-valid-hash"));
    }

    #[test]
    fn two_hashes_of_same_plaintext_differ_by_salt() {
        assert_ne!(hash_token("s3cr3t"), hash_token("s3cr3t"));
    }
}
