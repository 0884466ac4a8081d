//! Error types for the processing loop.

use thiserror::Error;

use crate::broker::BrokerError;

/// Fatal errors from the processing loop.
///
/// Per-message failures (malformed bodies, rejected operations, by-query
/// conflicts that exhaust their schedule) are logged and absorbed; a
/// `ProcessError` means the loop cannot usefully continue.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Acknowledgement or channel operation failed.
    #[error("broker error: {0}")]
    Broker(String),

    /// The broker connection or channel closed underneath the loop.
    #[error("broker closed: {0}")]
    BrokerClosed(String),

    /// Consecutive flushes made no progress; the buffer is abandoned to
    /// broker redelivery.
    #[error("flush abandoned after {0} attempts without progress")]
    FlushRetriesExhausted(u32),

    /// An ordering barrier could not drain the buffer ahead of a
    /// non-bulkable operation.
    #[error("ordering barrier abandoned after {0} flush attempts")]
    BarrierRetriesExhausted(u32),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProcessError {
    /// Create a broker error.
    pub fn broker(msg: impl Into<String>) -> Self {
        Self::Broker(msg.into())
    }

    /// Create a broker-closed error.
    pub fn broker_closed(msg: impl Into<String>) -> Self {
        Self::BrokerClosed(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<BrokerError> for ProcessError {
    fn from(err: BrokerError) -> Self {
        Self::Broker(err.to_string())
    }
}
