//! Parsed representation of one broker message.
//!
//! Each message body is a self-describing JSON operation descriptor. Parsing
//! happens once at delivery reception; the element is immutable afterwards
//! and is destroyed when its delivery tag has been acknowledged.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use search_writer_repository::{
    ByQueryRequest, CreateIndexRequest, DeleteIndexRequest, DocumentOperation,
    DocumentOperationKind,
};

/// Errors from parsing or interrogating an action element.
#[derive(Error, Debug)]
pub enum ActionError {
    /// The body could not be parsed into a known operation descriptor.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The descriptor named an operation this writer does not know.
    #[error("unsupported operation kind: {0}")]
    UnknownKind(String),

    /// A kind-specific accessor was called on an incompatible element.
    #[error("{requested} requested on {actual:?} action")]
    Unsupported {
        requested: &'static str,
        actual: ActionKind,
    },
}

/// Classifier for an action element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Contributes one entry to a bulk request.
    Bulkable,
    UpdateByQuery,
    DeleteByQuery,
    IndicesCreate,
    IndicesDelete,
}

#[derive(Debug, Clone)]
enum ActionPayload {
    Bulkable(DocumentOperation),
    UpdateByQuery(ByQueryRequest),
    DeleteByQuery(ByQueryRequest),
    IndicesCreate(CreateIndexRequest),
    IndicesDelete(DeleteIndexRequest),
}

/// Wire format of one operation descriptor, as produced by the legacy
/// publishers.
#[derive(Debug, Deserialize)]
struct Descriptor {
    op: String,
    index: String,
    #[serde(default)]
    doc_type: Option<String>,
    #[serde(default)]
    doc_id: Option<String>,
    #[serde(default)]
    routing: Option<String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    uri: Option<String>,
}

/// One parsed broker message, bound to its delivery tag.
#[derive(Debug, Clone)]
pub struct ActionElement {
    delivery_tag: u64,
    raw: Vec<u8>,
    target: String,
    payload: ActionPayload,
}

impl ActionElement {
    /// Parse a message body into an action element.
    pub fn parse(delivery_tag: u64, body: Vec<u8>) -> Result<Self, ActionError> {
        let descriptor: Descriptor = serde_json::from_slice(&body)
            .map_err(|e| ActionError::Malformed(e.to_string()))?;

        if descriptor.index.is_empty() {
            return Err(ActionError::Malformed("empty index name".to_string()));
        }

        let payload = match descriptor.op.as_str() {
            "index" => ActionPayload::Bulkable(Self::document_op(
                DocumentOperationKind::Index,
                &descriptor,
                descriptor.body.is_some(),
                false,
            )?),
            "update" => ActionPayload::Bulkable(Self::document_op(
                DocumentOperationKind::Update,
                &descriptor,
                descriptor.body.is_some(),
                descriptor.doc_id.is_some(),
            )?),
            "delete" => ActionPayload::Bulkable(Self::document_op(
                DocumentOperationKind::Delete,
                &descriptor,
                true,
                descriptor.doc_id.is_some(),
            )?),
            "update_by_query" => ActionPayload::UpdateByQuery(Self::by_query(&descriptor)?),
            "delete_by_query" => ActionPayload::DeleteByQuery(Self::by_query(&descriptor)?),
            "indices_create" => ActionPayload::IndicesCreate(CreateIndexRequest {
                index: descriptor.index.clone(),
                body: descriptor.body.clone(),
            }),
            "indices_delete" => ActionPayload::IndicesDelete(DeleteIndexRequest {
                index: descriptor.index.clone(),
            }),
            other => return Err(ActionError::UnknownKind(other.to_string())),
        };

        let target = descriptor
            .uri
            .clone()
            .unwrap_or_else(|| Self::derived_target(&descriptor));

        Ok(Self {
            delivery_tag,
            raw: body,
            target,
            payload,
        })
    }

    fn document_op(
        kind: DocumentOperationKind,
        descriptor: &Descriptor,
        has_required_body: bool,
        has_required_id: bool,
    ) -> Result<DocumentOperation, ActionError> {
        if !has_required_body {
            return Err(ActionError::Malformed(format!(
                "{} operation without a body",
                kind.as_str()
            )));
        }
        if matches!(
            kind,
            DocumentOperationKind::Update | DocumentOperationKind::Delete
        ) && !has_required_id
        {
            return Err(ActionError::Malformed(format!(
                "{} operation without a doc_id",
                kind.as_str()
            )));
        }
        Ok(DocumentOperation {
            kind,
            index: descriptor.index.clone(),
            doc_type: descriptor.doc_type.clone(),
            doc_id: descriptor.doc_id.clone(),
            routing: descriptor.routing.clone(),
            source: descriptor.body.clone(),
        })
    }

    fn by_query(descriptor: &Descriptor) -> Result<ByQueryRequest, ActionError> {
        let body = descriptor
            .body
            .clone()
            .ok_or_else(|| ActionError::Malformed("by-query operation without a body".to_string()))?;
        Ok(ByQueryRequest {
            index: descriptor.index.clone(),
            body,
        })
    }

    fn derived_target(descriptor: &Descriptor) -> String {
        let mut target = format!("/{}", descriptor.index);
        if let Some(doc_type) = &descriptor.doc_type {
            target.push('/');
            target.push_str(doc_type);
        }
        if let Some(doc_id) = &descriptor.doc_id {
            target.push('/');
            target.push_str(doc_id);
        }
        target
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// The raw message body, kept for error logging.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The operation's target URL, matched by the URL filters.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn kind(&self) -> ActionKind {
        match &self.payload {
            ActionPayload::Bulkable(_) => ActionKind::Bulkable,
            ActionPayload::UpdateByQuery(_) => ActionKind::UpdateByQuery,
            ActionPayload::DeleteByQuery(_) => ActionKind::DeleteByQuery,
            ActionPayload::IndicesCreate(_) => ActionKind::IndicesCreate,
            ActionPayload::IndicesDelete(_) => ActionKind::IndicesDelete,
        }
    }

    /// The bulk entry this element contributes, for bulkable elements.
    pub fn as_document_operation(&self) -> Result<&DocumentOperation, ActionError> {
        match &self.payload {
            ActionPayload::Bulkable(op) => Ok(op),
            _ => Err(self.unsupported("bulk operation")),
        }
    }

    pub fn as_update_by_query(&self) -> Result<&ByQueryRequest, ActionError> {
        match &self.payload {
            ActionPayload::UpdateByQuery(req) => Ok(req),
            _ => Err(self.unsupported("update-by-query request")),
        }
    }

    pub fn as_delete_by_query(&self) -> Result<&ByQueryRequest, ActionError> {
        match &self.payload {
            ActionPayload::DeleteByQuery(req) => Ok(req),
            _ => Err(self.unsupported("delete-by-query request")),
        }
    }

    pub fn as_create_index(&self) -> Result<&CreateIndexRequest, ActionError> {
        match &self.payload {
            ActionPayload::IndicesCreate(req) => Ok(req),
            _ => Err(self.unsupported("index-create request")),
        }
    }

    pub fn as_delete_index(&self) -> Result<&DeleteIndexRequest, ActionError> {
        match &self.payload {
            ActionPayload::IndicesDelete(req) => Ok(req),
            _ => Err(self.unsupported("index-delete request")),
        }
    }

    fn unsupported(&self, requested: &'static str) -> ActionError {
        ActionError::Unsupported {
            requested,
            actual: self.kind(),
        }
    }
}
