//! Lifecycle owner: couples close events to processor shutdown.
//!
//! Close events arrive on a shared stop channel from three watchers: the
//! connection close-watcher (registered on the lapin connection), the
//! delivery pump (which reports channel closure when the consumer stream
//! ends), and an interrupt handler. The processor observes the stop channel
//! between events; an in-flight flush or dispatch finishes first.

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use crate::broker::{BrokerDelivery, StopReason};
use crate::processor::Processor;
use crate::WriterError;

pub struct Supervisor {
    processor: Processor,
    deliveries: Option<mpsc::Receiver<BrokerDelivery>>,
    stop_tx: broadcast::Sender<StopReason>,
}

impl Supervisor {
    pub fn new(
        processor: Processor,
        deliveries: mpsc::Receiver<BrokerDelivery>,
        stop_tx: broadcast::Sender<StopReason>,
    ) -> Self {
        Self {
            processor,
            deliveries: Some(deliveries),
            stop_tx,
        }
    }

    /// A handle close-watchers use to request shutdown.
    pub fn stop_handle(&self) -> broadcast::Sender<StopReason> {
        self.stop_tx.clone()
    }

    /// Run the processor until it stops.
    ///
    /// Returns `Err` for broker-fatal stops so the process exits non-zero;
    /// an operator interrupt is a clean exit.
    pub async fn run(&mut self) -> Result<(), WriterError> {
        let deliveries = self
            .deliveries
            .take()
            .ok_or_else(|| WriterError::config("supervisor already ran"))?;
        let stop_rx = self.stop_tx.subscribe();

        let stop = self.stop_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; requesting shutdown");
                let _ = stop.send(StopReason::Interrupted);
            }
        });

        match self.processor.run(deliveries, stop_rx).await {
            Ok(()) => {
                info!("processor stopped cleanly");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "processor stopped with fatal error");
                Err(e.into())
            }
        }
    }
}
