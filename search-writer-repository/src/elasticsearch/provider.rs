//! Elasticsearch implementation of `SearchStore`.

use async_trait::async_trait;
use elasticsearch::{
    http::request::JsonBody,
    http::transport::Transport,
    indices::{IndicesCreateParts, IndicesDeleteParts},
    params::Refresh,
    BulkParts, DeleteByQueryParts, Elasticsearch, UpdateByQueryParts,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::StoreConfig;
use crate::errors::SearchStoreError;
use crate::interfaces::SearchStore;
use crate::types::{
    ByQueryRequest, CreateIndexRequest, DeleteIndexRequest, DocumentOperation,
    DocumentOperationKind, FlushSummary, ItemOutcome, RefreshPolicy,
};

/// Search store backed by an Elasticsearch-compatible cluster.
pub struct ElasticsearchStore {
    client: Elasticsearch,
    config: StoreConfig,
}

impl ElasticsearchStore {
    /// Connect to the cluster and verify it responds to a ping.
    ///
    /// The URL's query string is dropped before building the transport;
    /// legacy configurations carry client hints there (`sniff=false`) that
    /// mean nothing to this client.
    pub async fn new(config: StoreConfig) -> Result<Self, SearchStoreError> {
        let mut endpoint =
            Url::parse(&config.url).map_err(|e| SearchStoreError::connection(e.to_string()))?;
        if endpoint.query().is_some() {
            debug!(url = %config.url, "ignoring query string on cluster URL");
            endpoint.set_query(None);
        }

        let transport = Transport::single_node(endpoint.as_str())
            .map_err(|e| SearchStoreError::connection(e.to_string()))?;
        let client = Elasticsearch::new(transport);

        match client.ping().send().await {
            Ok(response) if response.status_code().is_success() => {
                info!(url = %endpoint, "connected to search cluster");
            }
            Ok(response) => {
                warn!(
                    url = %endpoint,
                    status = %response.status_code(),
                    "search cluster ping returned non-success status"
                );
            }
            Err(e) => {
                return Err(SearchStoreError::connection(format!(
                    "failed to ping search cluster: {}",
                    e
                )));
            }
        }

        Ok(Self { client, config })
    }

    /// Build the newline-delimited bulk body for a batch of operations.
    fn bulk_body(operations: &[DocumentOperation]) -> Vec<Value> {
        let mut body = Vec::with_capacity(operations.len() * 2);
        for op in operations {
            let mut meta = serde_json::Map::new();
            meta.insert("_index".to_string(), json!(op.index));
            if let Some(doc_type) = &op.doc_type {
                meta.insert("_type".to_string(), json!(doc_type));
            }
            if let Some(doc_id) = &op.doc_id {
                meta.insert("_id".to_string(), json!(doc_id));
            }
            if let Some(routing) = &op.routing {
                meta.insert("routing".to_string(), json!(routing));
            }
            body.push(json!({ op.kind.as_str(): Value::Object(meta) }));

            match op.kind {
                DocumentOperationKind::Index => {
                    body.push(op.source.clone().unwrap_or_else(|| json!({})));
                }
                DocumentOperationKind::Update => {
                    body.push(json!({
                        "doc": op.source.clone().unwrap_or_else(|| json!({})),
                        "doc_as_upsert": true,
                    }));
                }
                DocumentOperationKind::Delete => {}
            }
        }
        body
    }

    /// Extract per-item outcomes from a bulk response body, in order.
    fn parse_bulk_items(response: &Value) -> Vec<ItemOutcome> {
        response
            .get("items")
            .and_then(|i| i.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        // Each item is keyed by its action name.
                        let result = item
                            .as_object()
                            .and_then(|o| o.values().next())
                            .cloned()
                            .unwrap_or(Value::Null);
                        ItemOutcome {
                            status: result
                                .get("status")
                                .and_then(|s| s.as_u64())
                                .unwrap_or(0) as u16,
                            error: result.get("error").map(|e| e.to_string()),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn by_query(
        &self,
        request: &ByQueryRequest,
        delete: bool,
    ) -> Result<u64, SearchStoreError> {
        let index = [request.index.as_str()];
        let response = if delete {
            self.client
                .delete_by_query(DeleteByQueryParts::Index(&index))
                .body(request.body.clone())
                .request_timeout(self.config.bulk_timeout)
                .send()
                .await
        } else {
            self.client
                .update_by_query(UpdateByQueryParts::Index(&index))
                .body(request.body.clone())
                .request_timeout(self.config.bulk_timeout)
                .send()
                .await
        }
        .map_err(|e| SearchStoreError::transport(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchStoreError::from_response(status.as_u16(), &body));
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| SearchStoreError::serialization(e.to_string()))?;
        let affected = body
            .get(if delete { "deleted" } else { "updated" })
            .and_then(|n| n.as_u64())
            .unwrap_or(0);

        debug!(index = %request.index, affected, "by-query write applied");
        Ok(affected)
    }
}

#[async_trait]
impl SearchStore for ElasticsearchStore {
    async fn bulk_flush(
        &self,
        operations: &[DocumentOperation],
        refresh: RefreshPolicy,
    ) -> Result<FlushSummary, SearchStoreError> {
        if operations.is_empty() {
            return Ok(FlushSummary::from_items(Vec::new()));
        }

        let body: Vec<JsonBody<Value>> = Self::bulk_body(operations)
            .into_iter()
            .map(JsonBody::new)
            .collect();

        let refresh_param = match refresh {
            RefreshPolicy::True => Refresh::True,
            RefreshPolicy::False => Refresh::False,
            RefreshPolicy::WaitFor => Refresh::WaitFor,
        };

        let response = self
            .client
            .bulk(BulkParts::None)
            .refresh(refresh_param)
            .request_timeout(self.config.bulk_timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| SearchStoreError::transport(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "bulk request failed");
            return Err(SearchStoreError::from_response(status.as_u16(), &body));
        }

        let response_body = response
            .json::<Value>()
            .await
            .map_err(|e| SearchStoreError::serialization(e.to_string()))?;

        let items = Self::parse_bulk_items(&response_body);
        if items.len() != operations.len() {
            return Err(SearchStoreError::serialization(format!(
                "bulk response carried {} items for {} operations",
                items.len(),
                operations.len()
            )));
        }

        let summary = FlushSummary::from_items(items);
        if summary.failed > 0 {
            warn!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                "bulk flush completed with item failures"
            );
        } else {
            debug!(count = summary.succeeded, "bulk flush accepted");
        }
        Ok(summary)
    }

    async fn update_by_query(&self, request: &ByQueryRequest) -> Result<u64, SearchStoreError> {
        self.by_query(request, false).await
    }

    async fn delete_by_query(&self, request: &ByQueryRequest) -> Result<u64, SearchStoreError> {
        self.by_query(request, true).await
    }

    async fn create_index(&self, request: &CreateIndexRequest) -> Result<(), SearchStoreError> {
        let parts = IndicesCreateParts::Index(&request.index);
        let response = match &request.body {
            Some(body) => {
                self.client
                    .indices()
                    .create(parts)
                    .body(body.clone())
                    .send()
                    .await
            }
            None => self.client.indices().create(parts).send().await,
        }
        .map_err(|e| SearchStoreError::transport(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchStoreError::from_response(status.as_u16(), &body));
        }

        debug!(index = %request.index, "index created");
        Ok(())
    }

    async fn delete_index(&self, request: &DeleteIndexRequest) -> Result<(), SearchStoreError> {
        let index = [request.index.as_str()];
        let response = self
            .client
            .indices()
            .delete(IndicesDeleteParts::Index(&index))
            .send()
            .await
            .map_err(|e| SearchStoreError::transport(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchStoreError::from_response(status.as_u16(), &body));
        }

        debug!(index = %request.index, "index deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_op(id: &str) -> DocumentOperation {
        DocumentOperation {
            kind: DocumentOperationKind::Index,
            index: "events".to_string(),
            doc_type: Some("event".to_string()),
            doc_id: Some(id.to_string()),
            routing: None,
            source: Some(json!({"title": "hello"})),
        }
    }

    #[test]
    fn test_bulk_body_index_pairs_meta_and_source() {
        let body = ElasticsearchStore::bulk_body(&[index_op("1")]);
        assert_eq!(body.len(), 2);
        assert_eq!(body[0]["index"]["_index"], "events");
        assert_eq!(body[0]["index"]["_type"], "event");
        assert_eq!(body[0]["index"]["_id"], "1");
        assert_eq!(body[1]["title"], "hello");
    }

    #[test]
    fn test_bulk_body_update_wraps_doc_as_upsert() {
        let op = DocumentOperation {
            kind: DocumentOperationKind::Update,
            index: "events".to_string(),
            doc_type: None,
            doc_id: Some("2".to_string()),
            routing: Some("shard-a".to_string()),
            source: Some(json!({"title": "patched"})),
        };
        let body = ElasticsearchStore::bulk_body(&[op]);
        assert_eq!(body.len(), 2);
        assert!(body[0]["update"].get("_type").is_none());
        assert_eq!(body[0]["update"]["routing"], "shard-a");
        assert_eq!(body[1]["doc"]["title"], "patched");
        assert_eq!(body[1]["doc_as_upsert"], true);
    }

    #[test]
    fn test_bulk_body_delete_has_no_source_line() {
        let op = DocumentOperation {
            kind: DocumentOperationKind::Delete,
            index: "events".to_string(),
            doc_type: None,
            doc_id: Some("3".to_string()),
            routing: None,
            source: None,
        };
        let body = ElasticsearchStore::bulk_body(&[op, index_op("4")]);
        assert_eq!(body.len(), 3);
        assert_eq!(body[0]["delete"]["_id"], "3");
        assert_eq!(body[1]["index"]["_id"], "4");
    }

    #[test]
    fn test_parse_bulk_items_in_order() {
        let response = json!({
            "took": 3,
            "errors": true,
            "items": [
                {"index": {"_index": "events", "_id": "1", "status": 201}},
                {"update": {"_index": "events", "_id": "2", "status": 400,
                            "error": {"type": "mapper_parsing_exception", "reason": "bad field"}}},
                {"delete": {"_index": "events", "_id": "3", "status": 200}}
            ]
        });
        let items = ElasticsearchStore::parse_bulk_items(&response);
        assert_eq!(items.len(), 3);
        assert!(items[0].is_success());
        assert!(items[1].is_permanent_failure());
        assert!(items[1].error.as_deref().unwrap().contains("mapper_parsing_exception"));
        assert!(items[2].is_success());
    }

    #[test]
    fn test_parse_bulk_items_missing_items_is_empty() {
        let items = ElasticsearchStore::parse_bulk_items(&json!({"took": 1}));
        assert!(items.is_empty());
    }
}
