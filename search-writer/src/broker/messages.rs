//! Message types flowing between the broker adapter and the processor.

use std::fmt;

/// One raw delivery handed to the processor.
#[derive(Debug, Clone)]
pub struct BrokerDelivery {
    /// Broker-assigned tag, monotonic per channel. Tag 0 is a broker-side
    /// sentinel and is treated as malformed.
    pub delivery_tag: u64,
    pub body: Vec<u8>,
}

/// Why the writer is being asked to stop.
#[derive(Debug, Clone)]
pub enum StopReason {
    /// The broker connection errored or closed.
    ConnectionError(String),
    /// The channel closed (queue deleted, consumer cancelled, ...).
    ChannelClosed(String),
    /// Operator interrupt; a clean shutdown.
    Interrupted,
}

impl StopReason {
    /// Whether the process should exit non-zero for this reason.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StopReason::Interrupted)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::ConnectionError(e) => write!(f, "connection error: {}", e),
            StopReason::ChannelClosed(e) => write!(f, "channel closed: {}", e),
            StopReason::Interrupted => write!(f, "interrupted"),
        }
    }
}
