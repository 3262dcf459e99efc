use thiserror::Error;

/// Failures in the stateless primitives (component A): key generation, DH,
/// signing, HKDF, AEAD.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("signing failed: {0}")]
    SigningError(String),

    #[error("signature verification failed: {0}")]
    VerificationError(String),

    #[error("aead encryption failed: {0}")]
    EncryptionError(String),

    #[error("aead decryption failed: {0}")]
    DecryptionError(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("rng failure: {0}")]
    RngFailure(String),
}

/// Failures owned by a `Session` (component C): handshake, ratchet, replay.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("message authentication failed")]
    AuthFailed,

    #[error("message is too far out of order (skipped-key budget exceeded across all chains)")]
    OutOfOrderTooFar,

    #[error("message references an unknown ratchet chain")]
    UnknownChain,

    #[error("message key already consumed (replay)")]
    ReplayDetected,

    #[error("too many skipped message keys requested within a single DH chain (gap exceeds MAX_SKIP_PER_CHAIN)")]
    TooManySkipped,

    #[error("session is not in a state that permits this operation: {0}")]
    InvalidState(String),

    #[error("remote identity key does not match the pinned identity: {0}")]
    IdentityMismatch(String),

    #[error("prekey bundle is malformed or its signature does not verify: {0}")]
    InvalidPreKeyBundle(String),
}

/// Failures from the storage contract (§6).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("stored value could not be decoded: {0}")]
    Corrupt(String),
}
