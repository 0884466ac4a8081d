//! Search store trait definition.

use async_trait::async_trait;

use crate::errors::SearchStoreError;
use crate::types::{
    ByQueryRequest, CreateIndexRequest, DeleteIndexRequest, DocumentOperation, FlushSummary,
    RefreshPolicy,
};

/// Abstracts the underlying search cluster client.
///
/// Implementations are injected into the processor so tests can substitute a
/// recording mock. All methods return `Result<T, SearchStoreError>`; response
/// failures are pre-classified so callers can drive retry and
/// benign-lifecycle policies off the variant.
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Submit a batch of document operations as one bulk request.
    ///
    /// The bulk call is atomic only per item: the summary carries one
    /// [`crate::types::ItemOutcome`] per submitted operation, in order. An
    /// `Err` means the request as a whole failed (transport error, timeout,
    /// non-success bulk response) and nothing can be assumed applied.
    async fn bulk_flush(
        &self,
        operations: &[DocumentOperation],
        refresh: RefreshPolicy,
    ) -> Result<FlushSummary, SearchStoreError>;

    /// Update documents matching a query. Returns the number of documents
    /// updated.
    async fn update_by_query(&self, request: &ByQueryRequest) -> Result<u64, SearchStoreError>;

    /// Delete documents matching a query. Returns the number of documents
    /// deleted.
    async fn delete_by_query(&self, request: &ByQueryRequest) -> Result<u64, SearchStoreError>;

    /// Create an index, optionally with settings and mappings.
    async fn create_index(&self, request: &CreateIndexRequest) -> Result<(), SearchStoreError>;

    /// Delete an index.
    async fn delete_index(&self, request: &DeleteIndexRequest) -> Result<(), SearchStoreError>;
}
