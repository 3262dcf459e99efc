use thiserror::Error;

/// Failures surfaced by the broker (§4.E, §7).
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Transport(#[from] signet_protocol::TransportError),

    #[error("target user is not connected")]
    UserOffline,

    #[error("target user's outbound queue is full")]
    QueueFull,

    #[error("sender has exceeded their rate limit")]
    RateLimited,

    #[error("connection has not completed the authentication handshake")]
    NotAuthenticated,

    #[error("challenge response signature does not verify")]
    BadChallengeResponse,

    #[error("connection was superseded by a newer one for the same user")]
    Superseded,
}

impl RelayError {
    /// Short machine-readable code for an `error` envelope's `code` field
    /// (§4.E, §7).
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Transport(inner) => inner.code(),
            RelayError::UserOffline => "UserOffline",
            RelayError::QueueFull => "QueueFull",
            RelayError::RateLimited => "RateLimited",
            RelayError::NotAuthenticated => "NotAuthenticated",
            RelayError::BadChallengeResponse => "BadChallengeResponse",
            RelayError::Superseded => "Superseded",
        }
    }
}
