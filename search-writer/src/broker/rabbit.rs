//! RabbitMQ broker adapter built on lapin.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerChannel, BrokerDelivery, BrokerError, StopReason};
use crate::config::Settings;

/// Broker adapter owning the AMQP channel.
///
/// The channel serialises its own writes; acknowledgements may be issued
/// from the processor while the delivery pump reads the consumer stream.
#[derive(Clone)]
pub struct RabbitBroker {
    channel: Channel,
}

impl RabbitBroker {
    /// Dial the broker, open a channel, declare the exchange, and apply QoS.
    ///
    /// The connection is returned alongside so the caller can register a
    /// close-watcher and keep it alive for the writer's lifetime.
    pub async fn connect(settings: &Settings) -> Result<(Self, Connection), BrokerError> {
        let connection =
            Connection::connect(&settings.broker_url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        let kind = match settings.exchange_kind.as_str() {
            "topic" => ExchangeKind::Topic,
            "direct" => ExchangeKind::Direct,
            other => return Err(BrokerError::UnsupportedExchangeKind(other.to_string())),
        };

        channel
            .exchange_declare(
                &settings.exchange,
                kind,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;

        channel
            .basic_qos(settings.prefetch_count, BasicQosOptions::default())
            .await?;
        if settings.prefetch_size > 0 {
            // The AMQP prefetch byte cap is not implemented by RabbitMQ.
            warn!(
                prefetch_size = settings.prefetch_size,
                "prefetch byte cap configured but not enforced by the broker"
            );
        }

        info!(
            url = %settings.broker_url,
            exchange = %settings.exchange,
            kind = %settings.exchange_kind,
            prefetch_count = settings.prefetch_count,
            "broker channel ready"
        );

        Ok((Self { channel }, connection))
    }

    /// Declare and bind the queue, start a manual-ack consumer, and pump
    /// deliveries into `deliveries` until the stream ends.
    ///
    /// Stream termination means the channel closed; it is reported on
    /// `stop` so the supervisor can shut the writer down.
    pub async fn declare_and_consume(
        &self,
        settings: &Settings,
        deliveries: mpsc::Sender<BrokerDelivery>,
        stop: broadcast::Sender<StopReason>,
    ) -> Result<(), BrokerError> {
        let mut arguments = FieldTable::default();
        if settings.single_active_consumer {
            arguments.insert(
                "x-single-active-consumer".into(),
                AMQPValue::Boolean(true),
            );
        }

        let queue = self
            .channel
            .queue_declare(
                &settings.queue_name,
                QueueDeclareOptions::default(),
                arguments,
            )
            .await?;

        self.channel
            .queue_bind(
                queue.name().as_str(),
                &settings.exchange,
                &settings.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let consumer = self
            .channel
            .basic_consume(
                queue.name().as_str(),
                &settings.consumer_name,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %queue.name(),
            routing_key = %settings.routing_key,
            consumer = %settings.consumer_name,
            "consuming"
        );

        tokio::spawn(pump_deliveries(consumer, deliveries, stop));
        Ok(())
    }
}

/// Forward the consumer stream into the processor's channel.
async fn pump_deliveries(
    mut consumer: Consumer,
    deliveries: mpsc::Sender<BrokerDelivery>,
    stop: broadcast::Sender<StopReason>,
) {
    while let Some(next) = consumer.next().await {
        match next {
            Ok(delivery) => {
                let message = BrokerDelivery {
                    delivery_tag: delivery.delivery_tag,
                    body: delivery.data,
                };
                if deliveries.send(message).await.is_err() {
                    debug!("processor gone; stopping delivery pump");
                    return;
                }
            }
            Err(e) => {
                error!(error = %e, "consumer stream error");
                let _ = stop.send(StopReason::ChannelClosed(e.to_string()));
                return;
            }
        }
    }

    warn!("consumer stream ended");
    let _ = stop.send(StopReason::ChannelClosed(
        "consumer stream ended".to_string(),
    ));
}

#[async_trait]
impl BrokerChannel for RabbitBroker {
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple })
            .await?;
        Ok(())
    }

    async fn nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        self.channel
            .basic_nack(delivery_tag, BasicNackOptions { multiple, requeue })
            .await?;
        Ok(())
    }
}
