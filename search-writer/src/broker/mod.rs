//! Broker adapter: queue topology, delivery intake, acknowledgements.

mod messages;
mod rabbit;

pub use messages::{BrokerDelivery, StopReason};
pub use rabbit::RabbitBroker;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from broker operations.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// AMQP protocol or connection failure.
    #[error("AMQP error: {0}")]
    Protocol(#[from] lapin::Error),

    /// The configured exchange kind is not one this writer supports.
    #[error("unsupported exchange kind: {0}")]
    UnsupportedExchangeKind(String),
}

/// Acknowledgement surface of the broker channel.
///
/// The processor holds this as a trait object so tests can substitute a
/// recording mock. Acks are issued individually in delivery-tag order,
/// which keeps them monotonic within the channel.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Acknowledge a delivery; with `multiple`, everything up to and
    /// including `delivery_tag`.
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), BrokerError>;

    /// Negatively acknowledge a delivery, optionally requeueing it.
    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool)
        -> Result<(), BrokerError>;
}
