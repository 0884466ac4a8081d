//! # Search Writer
//!
//! Durable adapter between an AMQP broker and a search cluster. Producers
//! publish index mutations as individual messages; the writer buffers
//! bulkable mutations, flushes them as one batch, and acknowledges the
//! broker only after the cluster has accepted the batch.
//!
//! ## Architecture
//!
//! 1. **Broker adapter**: declares the queue and pumps deliveries inward
//! 2. **Processor**: classifies, buffers, and flushes (the core loop)
//! 3. **Search store**: bulk/by-query/lifecycle calls against the cluster
//! 4. **Supervisor**: couples close events to shutdown
//!
//! ## Modules
//!
//! - [`action`]: parsed representation of one broker message
//! - [`buffer`]: ordered staging area for bulkable actions
//! - [`broker`]: queue topology, delivery intake, acknowledgements
//! - [`processor`]: the consume-batch-flush state machine
//! - [`supervisor`]: lifecycle and shutdown propagation
//! - [`config`]: settings and dependency wiring
//! - [`errors`]: error types for the processing loop

pub mod action;
pub mod broker;
pub mod buffer;
pub mod config;
pub mod errors;
pub mod processor;
pub mod supervisor;

pub use config::{Dependencies, Settings};
pub use errors::ProcessError;

use thiserror::Error;

/// Errors that can occur during writer initialization or execution.
#[derive(Error, Debug)]
pub enum WriterError {
    /// Configuration or startup error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Fatal error from the processing loop.
    #[error("processing error: {0}")]
    Process(#[from] ProcessError),
}

impl WriterError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
