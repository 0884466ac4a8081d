//! Error types for search store operations.

mod search_store_error;

pub use search_store_error::SearchStoreError;
