//! Configuration for search store implementations.

use std::time::Duration;

/// Connection and request configuration for a search store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Cluster URL, e.g. `http://127.0.0.1:9200`.
    pub url: String,
    /// Upper bound for a single bulk or by-query request.
    pub bulk_timeout: Duration,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>, bulk_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            bulk_timeout,
        }
    }
}
