//! Error types for lottery-wire.

use thiserror::Error;

use crate::protocol::ErrorCode;

/// Main error type for all lottery-wire operations.
#[derive(Debug, Error)]
pub enum LotteryError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the connection before the expected bytes arrived.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A field could not be encoded (e.g. a birth date that is not 10 bytes).
    #[error("Format error: {0}")]
    Format(String),

    /// Message body does not match its declared structure.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Message body is well-formed but carries an invalid value.
    #[error("Invalid message: {0}")]
    Invalid(String),

    /// Frame-level violation (zero or oversize length). The byte stream can
    /// no longer be trusted.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer answered with an ERROR frame.
    #[error("Rejected by peer: {0}")]
    Rejected(ErrorCode),

    /// Winners query attempts were exhausted without a result.
    #[error("Winners query exhausted after {attempts} attempts")]
    RetryExhausted {
        /// Queries sent in total.
        attempts: u32,
    },

    /// Not every agency notified before the rendezvous deadline.
    #[error("Rendezvous timed out before every agency notified")]
    RendezvousTimeout,

    /// The lottery was already drawn; no more bets are accepted.
    #[error("Lottery already drawn, bets are closed")]
    LotteryClosed,

    /// Configuration value missing or unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A pipeline task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(String),
}

impl LotteryError {
    /// Whether the connection that produced this error must be dropped.
    ///
    /// Decode errors of a correctly delimited frame leave the stream in sync;
    /// transport failures and frame-level violations do not.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            LotteryError::Io(_) | LotteryError::ConnectionClosed | LotteryError::Protocol(_)
        )
    }
}

impl From<tokio::task::JoinError> for LotteryError {
    fn from(e: tokio::task::JoinError) -> Self {
        LotteryError::Task(e.to_string())
    }
}

/// Result type alias using LotteryError.
pub type Result<T> = std::result::Result<T, LotteryError>;
