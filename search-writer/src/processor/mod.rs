//! The consume-batch-flush state machine.
//!
//! A single task owns the action buffer and selects over deliveries, a
//! periodic tick, and the stop channel. Flushes and direct dispatches run
//! inline, blocking further consumption; together with the broker's
//! prefetch window this bounds the number of unacknowledged deliveries to
//! one batch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use search_writer_repository::{
    ByQueryRequest, DocumentOperation, RefreshPolicy, SearchStore, SearchStoreError,
};

use crate::action::{ActionElement, ActionKind};
use crate::broker::{BrokerChannel, BrokerDelivery, StopReason};
use crate::buffer::ActionBuffer;
use crate::errors::ProcessError;

/// Consecutive no-progress flushes tolerated before giving up and letting
/// broker redelivery take over.
const MAX_FLUSH_ATTEMPTS: u32 = 8;

/// Flush attempts an ordering barrier may spend draining the buffer before
/// the writer gives up. Bounds the barrier even when every attempt makes
/// partial progress.
const MAX_BARRIER_ATTEMPTS: u32 = 8;

/// Pause between flush attempts when an ordering barrier has to retry.
const BARRIER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Wait applied after each conflicted by-query attempt. The final zero
/// entry means the last attempt is not followed by a wait.
const CONFLICT_RETRY_INTERVALS: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(3),
    Duration::from_secs(7),
    Duration::ZERO,
];

/// Configuration for the processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Buffered bulkables that trigger an immediate flush. Matches the
    /// broker prefetch count.
    pub batch_size: usize,
    /// Idle-flush period.
    pub tick_interval: Duration,
    /// Refresh policy for regular flushes.
    pub refresh: RefreshPolicy,
    /// When set, operations whose target does not contain this substring
    /// are dropped (acked without applying).
    pub url_contains: Option<String>,
    /// When set, operations whose target contains this substring are
    /// dropped.
    pub url_not_contains: Option<String>,
    /// Log each buffered bulkable.
    pub debug: bool,
}

impl ProcessorConfig {
    /// Whether an operation targeting `target` passes the URL filters.
    pub fn permits_target(&self, target: &str) -> bool {
        if let Some(needle) = &self.url_contains {
            if !target.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(needle) = &self.url_not_contains {
            if target.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}

/// The core loop: classifies deliveries, buffers bulkables, and enforces
/// the acknowledgement discipline.
pub struct Processor {
    broker: Arc<dyn BrokerChannel>,
    store: Arc<dyn SearchStore>,
    config: ProcessorConfig,
    buffer: ActionBuffer,
    /// Consecutive flushes that acked nothing.
    failed_flushes: u32,
}

impl Processor {
    pub fn new(
        broker: Arc<dyn BrokerChannel>,
        store: Arc<dyn SearchStore>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            broker,
            store,
            config,
            buffer: ActionBuffer::new(),
            failed_flushes: 0,
        }
    }

    /// Run until the deliveries channel closes or a stop is signalled.
    ///
    /// An in-flight flush or dispatch completes before the stop is
    /// observed; no further deliveries are drained afterwards.
    #[instrument(skip_all)]
    pub async fn run(
        &mut self,
        mut deliveries: mpsc::Receiver<BrokerDelivery>,
        mut stop: broadcast::Receiver<StopReason>,
    ) -> Result<(), ProcessError> {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it.
        ticker.tick().await;

        info!(
            batch_size = self.config.batch_size,
            tick_interval = ?self.config.tick_interval,
            "processor running"
        );

        loop {
            tokio::select! {
                reason = stop.recv() => {
                    return match reason {
                        Ok(reason) if reason.is_fatal() => {
                            error!(%reason, "broker close event; shutting down");
                            Err(ProcessError::broker_closed(reason.to_string()))
                        }
                        Ok(_) => {
                            info!("stop requested; shutting down");
                            Ok(())
                        }
                        Err(_) => {
                            warn!("stop channel dropped; shutting down");
                            Ok(())
                        }
                    };
                }
                maybe = deliveries.recv() => {
                    match maybe {
                        Some(delivery) => self.handle_delivery(delivery).await?,
                        None => {
                            return Err(ProcessError::broker_closed(
                                "delivery stream closed",
                            ));
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !self.buffer.is_empty() {
                        debug!(buffered = self.buffer.len(), "idle flush");
                        self.flush(self.config.refresh).await?;
                    }
                }
            }
        }
    }

    /// Classify one delivery and route it to the buffer or to a direct
    /// dispatch.
    async fn handle_delivery(&mut self, delivery: BrokerDelivery) -> Result<(), ProcessError> {
        // Tag 0 is the broker-side sentinel; never a routable delivery.
        if delivery.delivery_tag == 0 {
            warn!("received sentinel delivery tag 0; rejecting");
            self.broker.nack(0, false, false).await?;
            return Ok(());
        }

        let element = match ActionElement::parse(delivery.delivery_tag, delivery.body) {
            Ok(element) => element,
            Err(e) => {
                error!(
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "discarding malformed message"
                );
                self.broker.nack(delivery.delivery_tag, false, false).await?;
                return Ok(());
            }
        };

        if !self.config.permits_target(element.target()) {
            debug!(
                delivery_tag = element.delivery_tag(),
                target = element.target(),
                "dropping filtered message"
            );
            self.broker.ack(element.delivery_tag(), false).await?;
            return Ok(());
        }

        if element.kind() == ActionKind::Bulkable {
            if self.config.debug {
                debug!(
                    delivery_tag = element.delivery_tag(),
                    buffered = self.buffer.len() + 1,
                    "buffered bulkable action"
                );
            }
            self.buffer
                .append(element)
                .map_err(|e| ProcessError::internal(e.to_string()))?;
            if self.buffer.len() >= self.config.batch_size {
                self.flush(self.config.refresh).await?;
            }
            return Ok(());
        }

        // Ordering barrier: everything buffered before a non-bulkable must
        // be applied and visible before the non-bulkable executes.
        if !self.buffer.is_empty() {
            debug!(
                delivery_tag = element.delivery_tag(),
                buffered = self.buffer.len(),
                "flushing ahead of non-bulkable action"
            );
            self.flush_barrier().await?;
        }

        self.direct_dispatch(&element).await
    }

    /// Flush ahead of a non-bulkable action, forcing `wait_for` so the
    /// flushed documents are visible to the dispatch that follows.
    ///
    /// Items a partial failure keeps in the buffer are flushed again after
    /// a short pause; the barrier gives up once its attempt cap is
    /// reached, leaving the remaining deliveries unacked for redelivery.
    async fn flush_barrier(&mut self) -> Result<(), ProcessError> {
        for attempt in 1..=MAX_BARRIER_ATTEMPTS {
            self.flush(RefreshPolicy::WaitFor).await?;
            if self.buffer.is_empty() {
                return Ok(());
            }
            warn!(
                attempt,
                buffered = self.buffer.len(),
                "barrier flush left items behind; retrying"
            );
            sleep(BARRIER_RETRY_DELAY).await;
        }
        Err(ProcessError::BarrierRetriesExhausted(MAX_BARRIER_ATTEMPTS))
    }

    /// Submit the buffered batch and settle acknowledgements per item.
    async fn flush(&mut self, refresh: RefreshPolicy) -> Result<(), ProcessError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let operations: Vec<DocumentOperation> = self
            .buffer
            .elements()
            .iter()
            .filter_map(|e| e.as_document_operation().ok().cloned())
            .collect();

        let summary = match self.store.bulk_flush(&operations, refresh).await {
            Ok(summary) => summary,
            Err(e) => {
                // Keep the buffer: the same elements are retried on the
                // next trigger, and the broker holds their deliveries
                // unacked meanwhile.
                return self.record_no_progress(&e.to_string());
            }
        };

        if summary.items.len() != operations.len() {
            return self.record_no_progress(&format!(
                "bulk summary carried {} items for {} operations",
                summary.items.len(),
                operations.len()
            ));
        }

        let mut acked = 0usize;
        let mut dropped = 0usize;
        let mut kept: Vec<u64> = Vec::new();

        for (element, item) in self.buffer.elements().iter().zip(summary.items.iter()) {
            if item.is_success() {
                self.broker.ack(element.delivery_tag(), false).await?;
                acked += 1;
            } else if item.is_permanent_failure() {
                error!(
                    delivery_tag = element.delivery_tag(),
                    status = item.status,
                    item_error = item.error.as_deref().unwrap_or(""),
                    body = %String::from_utf8_lossy(element.raw()),
                    "dropping permanently rejected operation"
                );
                self.broker.nack(element.delivery_tag(), false, false).await?;
                dropped += 1;
            } else {
                debug!(
                    delivery_tag = element.delivery_tag(),
                    status = item.status,
                    "keeping failed operation for retry"
                );
                kept.push(element.delivery_tag());
            }
        }

        let retried = kept.len();
        if kept.is_empty() {
            self.buffer.clear();
        } else {
            self.buffer
                .retain(|element| kept.contains(&element.delivery_tag()));
        }

        if acked > 0 || dropped > 0 {
            self.failed_flushes = 0;
            info!(flushed = acked, dropped, retried, "flush complete");
            Ok(())
        } else {
            self.record_no_progress("no item accepted")
        }
    }

    /// Count a flush that acked nothing; fatal once the cap is reached.
    fn record_no_progress(&mut self, cause: &str) -> Result<(), ProcessError> {
        self.failed_flushes += 1;
        error!(
            cause,
            attempts = self.failed_flushes,
            buffered = self.buffer.len(),
            "flush made no progress; keeping buffer for retry"
        );
        if self.failed_flushes >= MAX_FLUSH_ATTEMPTS {
            Err(ProcessError::FlushRetriesExhausted(self.failed_flushes))
        } else {
            Ok(())
        }
    }

    /// Execute a non-bulkable action and ack it on success.
    ///
    /// Store-side terminal failures are logged with the raw body and left
    /// unacked; the delivery is redelivered after the channel closes.
    async fn direct_dispatch(&mut self, element: &ActionElement) -> Result<(), ProcessError> {
        let outcome = match element.kind() {
            ActionKind::UpdateByQuery => match element.as_update_by_query() {
                Ok(request) => self.by_query_with_retry(request, false).await,
                Err(e) => return Err(ProcessError::internal(e.to_string())),
            },
            ActionKind::DeleteByQuery => match element.as_delete_by_query() {
                Ok(request) => self.by_query_with_retry(request, true).await,
                Err(e) => return Err(ProcessError::internal(e.to_string())),
            },
            ActionKind::IndicesCreate => match element.as_create_index() {
                Ok(request) => match self.store.create_index(request).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_index_already_exists() => {
                        info!(index = %request.index, "index already exists; nothing to do");
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                Err(e) => return Err(ProcessError::internal(e.to_string())),
            },
            ActionKind::IndicesDelete => match element.as_delete_index() {
                Ok(request) => match self.store.delete_index(request).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_index_not_found() => {
                        info!(index = %request.index, "index already gone; nothing to do");
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                Err(e) => return Err(ProcessError::internal(e.to_string())),
            },
            ActionKind::Bulkable => {
                return Err(ProcessError::internal(
                    "bulkable action routed to direct dispatch",
                ));
            }
        };

        match outcome {
            Ok(()) => {
                self.broker.ack(element.delivery_tag(), false).await?;
                Ok(())
            }
            Err(e) => {
                error!(
                    delivery_tag = element.delivery_tag(),
                    error = %e,
                    body = %String::from_utf8_lossy(element.raw()),
                    "failed to apply action; leaving delivery unacked"
                );
                Ok(())
            }
        }
    }

    /// Run a by-query write through the conflict retry schedule.
    ///
    /// Only version conflicts are retried; any other error aborts
    /// immediately.
    async fn by_query_with_retry(
        &self,
        request: &ByQueryRequest,
        delete: bool,
    ) -> Result<(), SearchStoreError> {
        let mut last_conflict = None;

        for wait in CONFLICT_RETRY_INTERVALS {
            let result = if delete {
                self.store.delete_by_query(request).await
            } else {
                self.store.update_by_query(request).await
            };

            match result {
                Ok(affected) => {
                    info!(index = %request.index, affected, "by-query write applied");
                    return Ok(());
                }
                Err(e) if e.is_conflict() => {
                    warn!(
                        index = %request.index,
                        error = %e,
                        retry_in = ?wait,
                        "by-query write conflicted"
                    );
                    last_conflict = Some(e);
                    if !wait.is_zero() {
                        sleep(wait).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict
            .unwrap_or_else(|| SearchStoreError::transport("conflict retries exhausted")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(contains: Option<&str>, not_contains: Option<&str>) -> ProcessorConfig {
        ProcessorConfig {
            batch_size: 10,
            tick_interval: Duration::from_secs(5),
            refresh: RefreshPolicy::True,
            url_contains: contains.map(str::to_string),
            url_not_contains: not_contains.map(str::to_string),
            debug: false,
        }
    }

    #[test]
    fn test_url_filters_disabled_by_default() {
        assert!(config(None, None).permits_target("/portals/portal/1"));
    }

    #[test]
    fn test_url_contains_filter() {
        let cfg = config(Some("portal"), None);
        assert!(cfg.permits_target("/portals/portal/1"));
        assert!(!cfg.permits_target("/enrolments/enrolment/1"));
    }

    #[test]
    fn test_url_not_contains_filter() {
        let cfg = config(None, Some("staging"));
        assert!(cfg.permits_target("/portals/portal/1"));
        assert!(!cfg.permits_target("/staging-portals/portal/1"));
    }

    #[test]
    fn test_url_filters_combine() {
        let cfg = config(Some("portal"), Some("staging"));
        assert!(cfg.permits_target("/portals/portal/1"));
        assert!(!cfg.permits_target("/staging/portal/1"));
        assert!(!cfg.permits_target("/accounts/account/1"));
    }
}
