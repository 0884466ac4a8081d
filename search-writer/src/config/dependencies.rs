//! Dependency initialization and wiring.

use std::sync::Arc;

use lapin::Connection;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use search_writer_repository::{ElasticsearchStore, StoreConfig};

use crate::broker::{RabbitBroker, StopReason};
use crate::config::Settings;
use crate::processor::{Processor, ProcessorConfig};
use crate::supervisor::Supervisor;
use crate::WriterError;

/// Container for all initialized dependencies.
///
/// Keeps the broker connection alive for the supervisor's lifetime; the
/// connection close-watcher is registered here.
pub struct Dependencies {
    /// The configured supervisor ready to run.
    pub supervisor: Supervisor,
    _connection: Connection,
}

impl Dependencies {
    /// Dial the broker and the search cluster, and wire the processor.
    pub async fn new(settings: Settings) -> Result<Self, WriterError> {
        let (stop_tx, _) = broadcast::channel(8);

        let (broker, connection) = RabbitBroker::connect(&settings)
            .await
            .map_err(|e| WriterError::config(format!("failed to connect to broker: {}", e)))?;

        // Connection close-watcher: any connection-level error stops the
        // writer.
        {
            let stop = stop_tx.clone();
            connection.on_error(move |err| {
                error!(error = %err, "broker connection error");
                let _ = stop.send(StopReason::ConnectionError(err.to_string()));
            });
        }

        let (deliveries_tx, deliveries_rx) = mpsc::channel(settings.batch_size());
        broker
            .declare_and_consume(&settings, deliveries_tx, stop_tx.clone())
            .await
            .map_err(|e| WriterError::config(format!("failed to start consuming: {}", e)))?;

        let store = ElasticsearchStore::new(StoreConfig::new(
            settings.es_url.as_str(),
            settings.bulk_timeout,
        ))
        .await
        .map_err(|e| WriterError::config(format!("failed to initialize search store: {}", e)))?;

        info!("dependencies initialized");

        let processor = Processor::new(
            Arc::new(broker),
            Arc::new(store),
            ProcessorConfig {
                batch_size: settings.batch_size(),
                tick_interval: settings.tick_interval,
                refresh: settings.refresh,
                url_contains: settings.url_contains.clone(),
                url_not_contains: settings.url_not_contains.clone(),
                debug: settings.debug,
            },
        );

        let supervisor = Supervisor::new(processor, deliveries_rx, stop_tx);

        Ok(Self {
            supervisor,
            _connection: connection,
        })
    }
}
