//! Stateless cryptographic primitives (component A).
//!
//! Every operation here is a free function with no session state; the
//! session and handshake layers are built entirely on top of this module.

use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Secret};

use crate::error::CryptoError;

/// AEAD nonce length for ChaCha20-Poly1305.
pub const NONCE_LEN: usize = 12;
/// Raw key length shared by X25519, Ed25519, and AEAD keys in this crate.
pub const KEY_LEN: usize = 32;

/// An X25519 keypair used for Diffie-Hellman agreement.
pub struct X25519KeyPair {
    pub secret: X25519Secret,
    pub public: X25519Public,
}

/// Generate a fresh X25519 keypair.
pub fn x25519_keypair() -> X25519KeyPair {
    let secret = X25519Secret::random_from_rng(OsRng);
    let public = X25519Public::from(&secret);
    tracing::trace!("generated x25519 keypair");
    X25519KeyPair { secret, public }
}

/// Perform an X25519 Diffie-Hellman agreement, returning the 32-byte shared secret.
pub fn x25519_dh(secret: &X25519Secret, public: &X25519Public) -> [u8; 32] {
    secret.diffie_hellman(public).to_bytes()
}

/// An Ed25519 keypair used for signing.
pub struct Ed25519KeyPair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

/// Generate a fresh Ed25519 signing keypair.
pub fn ed25519_keypair() -> Ed25519KeyPair {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();
    Ed25519KeyPair {
        signing_key,
        verifying_key,
    }
}

/// Sign `message` with `signing_key`.
pub fn ed25519_sign(signing_key: &SigningKey, message: &[u8]) -> Signature {
    signing_key.sign(message)
}

/// Verify `signature` over `message` under `verifying_key`.
pub fn ed25519_verify(
    verifying_key: &VerifyingKey,
    message: &[u8],
    signature: &Signature,
) -> Result<(), CryptoError> {
    verifying_key
        .verify(message, signature)
        .map_err(|e| CryptoError::VerificationError(e.to_string()))
}

/// HKDF-SHA256 extract-then-expand, with a domain-separated `info` string.
///
/// Callers are expected to pick distinct `info` values per derivation site —
/// this is what keeps, e.g., a root-key expansion from ever colliding with a
/// chain-key expansion even when fed the same input key material.
pub fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], out_len: usize) -> Result<Vec<u8>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; out_len];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(okm)
}

/// Seal `plaintext` under `key` with ChaCha20-Poly1305, binding `aad`.
pub fn aead_seal(key: &[u8; 32], nonce: &[u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::EncryptionError(e.to_string()))
}

/// Open a ChaCha20-Poly1305 ciphertext produced by [`aead_seal`].
pub fn aead_open(key: &[u8; 32], nonce: &[u8; NONCE_LEN], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|e| CryptoError::DecryptionError(e.to_string()))
}

/// Fill `buf` with cryptographically secure random bytes.
pub fn rand_bytes(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Constant-time byte-slice comparison. Returns `false` immediately (not
/// constant-time) if the lengths differ, since length is not secret here.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dh_is_commutative() {
        let alice = x25519_keypair();
        let bob = x25519_keypair();
        let shared_a = x25519_dh(&alice.secret, &bob.public);
        let shared_b = x25519_dh(&bob.secret, &alice.public);
        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn sign_verify_roundtrip() {
        let kp = ed25519_keypair();
        let sig = ed25519_sign(&kp.signing_key, b"hello");
        assert!(ed25519_verify(&kp.verifying_key, b"hello", &sig).is_ok());
        assert!(ed25519_verify(&kp.verifying_key, b"goodbye", &sig).is_err());
    }

    #[test]
    fn hkdf_is_domain_separated() {
        let ikm = [7u8; 32];
        let a = hkdf_sha256(b"salt", &ikm, b"info-a", 32).unwrap();
        let b = hkdf_sha256(b"salt", &ikm, b"info-b", 32).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn aead_roundtrip_and_tamper_detection() {
        let key = [1u8; 32];
        let nonce = [2u8; NONCE_LEN];
        let ct = aead_seal(&key, &nonce, b"hi", b"ad").unwrap();
        let pt = aead_open(&key, &nonce, &ct, b"ad").unwrap();
        assert_eq!(pt, b"hi");

        let mut tampered = ct.clone();
        tampered[0] ^= 1;
        assert!(aead_open(&key, &nonce, &tampered, b"ad").is_err());
        assert!(aead_open(&key, &nonce, &ct, b"wrong-ad").is_err());
    }

    #[test]
    fn ct_eq_rejects_mismatched_length() {
        assert!(!ct_eq(b"abc", b"ab"));
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
    }
}
