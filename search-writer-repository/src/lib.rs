//! # Search Writer Repository
//!
//! This crate provides the search store abstraction used by the search
//! writer: a trait describing bulk submission, by-query writes, and index
//! lifecycle calls, plus a concrete implementation backed by Elasticsearch.

pub mod config;
pub mod elasticsearch;
pub mod errors;
pub mod interfaces;
pub mod types;

pub use config::StoreConfig;
pub use elasticsearch::ElasticsearchStore;
pub use errors::SearchStoreError;
pub use interfaces::SearchStore;
pub use types::{
    ByQueryRequest, CreateIndexRequest, DeleteIndexRequest, DocumentOperation,
    DocumentOperationKind, FlushSummary, ItemOutcome, RefreshPolicy,
};
