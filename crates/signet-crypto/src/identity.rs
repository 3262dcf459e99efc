use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Secret};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;
use crate::primitives;

/// A user's long-term cryptographic identity.
///
/// There are no usernames or passwords at this layer — identity is a pair of
/// long-term keys: an Ed25519 keypair for signing (prekey bundles, envelopes)
/// and an independently generated X25519 keypair for Diffie-Hellman
/// agreement. The two are generated separately rather than one derived from
/// the other, since Ed25519-to-X25519 scalar conversion is not something
/// this crate treats as safe to rely on.
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    signing_key: SigningKey,
    dh_secret: X25519Secret,
    #[zeroize(skip)]
    dh_public: X25519Public,
}

impl IdentityKeyPair {
    /// Generate a new random identity.
    pub fn generate() -> Self {
        let sig = primitives::ed25519_keypair();
        let dh = primitives::x25519_keypair();
        Self {
            signing_key: sig.signing_key,
            dh_secret: dh.secret,
            dh_public: dh.public,
        }
    }

    /// Restore an identity from its two 32-byte secret scalars.
    pub fn from_secret_bytes(sig_secret: &[u8; 32], dh_secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(sig_secret);
        let dh_secret = X25519Secret::from(*dh_secret);
        let dh_public = X25519Public::from(&dh_secret);
        Self {
            signing_key,
            dh_secret,
            dh_public,
        }
    }

    pub fn signing_public(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn signing_public_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn dh_public(&self) -> X25519Public {
        self.dh_public
    }

    pub fn dh_secret(&self) -> &X25519Secret {
        &self.dh_secret
    }

    /// Secret signing scalar, for storage under the caller's own encryption-at-rest.
    pub fn signing_secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Secret DH scalar, for storage under the caller's own encryption-at-rest.
    pub fn dh_secret_bytes(&self) -> [u8; 32] {
        self.dh_secret.to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        primitives::ed25519_sign(&self.signing_key, message)
    }

    pub fn verify(
        public_key: &VerifyingKey,
        message: &[u8],
        signature: &Signature,
    ) -> Result<(), CryptoError> {
        primitives::ed25519_verify(public_key, message, signature)
    }

    /// First 8 bytes of SHA-256(sig_pub ‖ dh_pub), hex-encoded — a short
    /// human-comparable identifier, not a security boundary on its own.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.signing_public_bytes(), self.dh_public.as_bytes())
    }
}

/// Compute the fingerprint for a (signing, dh) public key pair without
/// requiring the full `IdentityKeyPair` — used to fingerprint a remote
/// contact's advertised keys.
pub fn fingerprint_of(sig_pub: &[u8; 32], dh_pub: &[u8; 32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sig_pub);
    hasher.update(dh_pub);
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_sign() {
        let id = IdentityKeyPair::generate();
        let sig = id.sign(b"hello signet");
        assert!(IdentityKeyPair::verify(&id.signing_public(), b"hello signet", &sig).is_ok());
    }

    #[test]
    fn roundtrip_secret_bytes() {
        let id = IdentityKeyPair::generate();
        let sig_secret = id.signing_secret_bytes();
        let dh_secret = id.dh_secret_bytes();
        let restored = IdentityKeyPair::from_secret_bytes(&sig_secret, &dh_secret);
        assert_eq!(id.signing_public_bytes(), restored.signing_public_bytes());
        assert_eq!(id.dh_public().as_bytes(), restored.dh_public().as_bytes());
    }

    #[test]
    fn dh_keys_are_independent_of_signing_keys() {
        let id = IdentityKeyPair::generate();
        assert_ne!(id.signing_public_bytes(), *id.dh_public().as_bytes());
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let id = IdentityKeyPair::generate();
        assert_eq!(id.fingerprint(), id.fingerprint());
        assert_eq!(id.fingerprint().len(), 16);
    }
}
