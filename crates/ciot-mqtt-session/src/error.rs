//! Session error types.

use thiserror::Error;

use crate::session::SessionState;

/// Errors that can occur while establishing or using the device session.
#[derive(Debug, Error)]
pub enum MqttError {
    /// Missing or malformed identity, trust or policy input. Fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// Token creation failed. Fatal.
    #[error("signing error: {0}")]
    Signing(String),

    /// No usable trust anchors. Fatal.
    #[error("trust error: {0}")]
    Trust(String),

    /// Local clock never reached the sanity threshold. Fatal.
    #[error("clock sync error: {0}")]
    ClockSync(String),

    /// TLS handshake, broker rejection or connect timeout. Retried.
    #[error("connect error: {0}")]
    Connect(String),

    /// Mid-session I/O failure. Triggers reconnect.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("not connected (session is {0})")]
    NotConnected(SessionState),

    #[error("auth token expired at {0}")]
    TokenExpired(chrono::DateTime<chrono::Utc>),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Encoded PUBLISH would exceed the negotiated maximum packet size.
    #[error("packet of {size} bytes exceeds the {max} byte limit")]
    PacketTooLarge { size: usize, max: usize },
}

impl MqttError {
    /// Errors that cannot be resolved by retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Signing(_) | Self::Trust(_) | Self::ClockSync(_)
        )
    }

    /// Errors absorbed by the session manager's retry loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Transport(_))
    }
}

/// Convenience alias for session results.
pub type MqttResult<T> = Result<T, MqttError>;
