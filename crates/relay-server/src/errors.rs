//! Per-connection error types.

use std::time::Duration;

/// Errors a connection can report to its caller.
///
/// None of these are fatal to the process; each one ends, at most, the
/// connection it was raised on.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The handle was closed or its writer is gone.
    #[error("connection closed")]
    ConnectionClosed,
    /// The outbound queue stayed full for the whole send timeout.
    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),
    /// The outbound queue was full and the message was dropped.
    #[error("outbound queue full")]
    QueueFull,
    /// The underlying stream reported an error.
    #[error("transport error: {0}")]
    Transport(String),
}

impl RelayError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConnectionClosed => "connection_closed",
            Self::SendTimeout(_) => "send_timeout",
            Self::QueueFull => "queue_full",
            Self::Transport(_) => "transport",
        }
    }
}
