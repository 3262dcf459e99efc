use thiserror::Error;

/// Failures in wire framing, signature verification, and transport I/O
/// (component D, §7).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("crypto error: {0}")]
    Crypto(#[from] signet_crypto::CryptoError),

    #[error("bad magic bytes in frame header")]
    BadMagic,

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    #[error("unknown envelope type: {0}")]
    UnknownEnvelopeType(u16),

    #[error("frame payload exceeds maximum length ({0} > {1})")]
    PayloadTooLarge(u32, u32),

    #[error("frame is truncated or malformed: {0}")]
    Malformed(String),

    #[error("envelope signature does not verify")]
    SignatureInvalid,

    #[error("payload could not be decoded as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,

    #[error("io error: {0}")]
    Io(String),

    #[error("operation timed out")]
    Timeout,
}

impl TransportError {
    /// Short machine-readable code for an `error` envelope's `code` field
    /// (§4.D: "Unknown types MUST be answered with `error`").
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Crypto(_) => "CryptoError",
            TransportError::BadMagic | TransportError::PayloadTooLarge(_, _) | TransportError::Malformed(_) | TransportError::Json(_) => "FrameInvalid",
            TransportError::UnsupportedVersion(_) => "VersionUnsupported",
            TransportError::UnknownEnvelopeType(_) => "UnknownEnvelopeType",
            TransportError::SignatureInvalid => "SignatureInvalid",
            TransportError::Closed | TransportError::Io(_) => "Disconnected",
            TransportError::Timeout => "Timeout",
        }
    }
}
