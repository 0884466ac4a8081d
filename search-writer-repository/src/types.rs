//! Request and outcome types shared by search store implementations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The bulk sub-operation a [`DocumentOperation`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOperationKind {
    /// Index a full document (creates or replaces).
    Index,
    /// Partial update, upserting when the document is missing.
    Update,
    /// Delete a single document by id.
    Delete,
}

impl DocumentOperationKind {
    /// The action name used on the metadata line of a bulk request.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentOperationKind::Index => "index",
            DocumentOperationKind::Update => "update",
            DocumentOperationKind::Delete => "delete",
        }
    }
}

/// A single-document write representable as one entry of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentOperation {
    pub kind: DocumentOperationKind,
    pub index: String,
    /// Legacy mapping type; omitted from the bulk metadata when absent.
    pub doc_type: Option<String>,
    pub doc_id: Option<String>,
    pub routing: Option<String>,
    /// Document body for index, partial document for update, unused for delete.
    pub source: Option<Value>,
}

/// An update-by-query or delete-by-query request against one index.
#[derive(Debug, Clone, PartialEq)]
pub struct ByQueryRequest {
    pub index: String,
    /// Query (and optional script) body, passed through to the cluster.
    pub body: Value,
}

/// Index creation request with optional settings/mappings body.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexRequest {
    pub index: String,
    pub body: Option<Value>,
}

/// Index deletion request.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteIndexRequest {
    pub index: String,
}

/// Visibility hint passed through to the cluster on bulk writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    True,
    False,
    WaitFor,
}

impl RefreshPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshPolicy::True => "true",
            RefreshPolicy::False => "false",
            RefreshPolicy::WaitFor => "wait_for",
        }
    }
}

impl FromStr for RefreshPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "true" => Ok(RefreshPolicy::True),
            "false" => Ok(RefreshPolicy::False),
            "wait_for" => Ok(RefreshPolicy::WaitFor),
            other => Err(format!(
                "unrecognized refresh policy '{}' (expected true, false or wait_for)",
                other
            )),
        }
    }
}

impl fmt::Display for RefreshPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one item inside a bulk call, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome {
    /// HTTP status the cluster reported for this item.
    pub status: u16,
    /// The item's error object, when the cluster rejected it.
    pub error: Option<String>,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// A rejection that will not succeed on resubmission (4xx other than 409).
    pub fn is_permanent_failure(&self) -> bool {
        (400..500).contains(&self.status) && self.status != 409
    }

    /// A failure worth retrying on the next flush (409 or 5xx).
    pub fn is_transient_failure(&self) -> bool {
        !self.is_success() && !self.is_permanent_failure()
    }
}

/// Per-item result of a bulk flush.
///
/// The bulk call is atomic only per item; `items` is aligned with the
/// submitted operations in order.
#[derive(Debug, Clone)]
pub struct FlushSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<ItemOutcome>,
}

impl FlushSummary {
    pub fn from_items(items: Vec<ItemOutcome>) -> Self {
        let total = items.len();
        let succeeded = items.iter().filter(|i| i.is_success()).count();
        Self {
            total,
            succeeded,
            failed: total - succeeded,
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_policy_round_trip() {
        for raw in ["true", "false", "wait_for"] {
            let policy: RefreshPolicy = raw.parse().unwrap();
            assert_eq!(policy.to_string(), raw);
        }
        assert!("yes".parse::<RefreshPolicy>().is_err());
    }

    #[test]
    fn test_item_outcome_classification() {
        let ok = ItemOutcome {
            status: 201,
            error: None,
        };
        assert!(ok.is_success());
        assert!(!ok.is_permanent_failure());

        let rejected = ItemOutcome {
            status: 400,
            error: Some("mapper_parsing_exception".to_string()),
        };
        assert!(rejected.is_permanent_failure());
        assert!(!rejected.is_transient_failure());

        let conflicted = ItemOutcome {
            status: 409,
            error: Some("version_conflict_engine_exception".to_string()),
        };
        assert!(conflicted.is_transient_failure());

        let overloaded = ItemOutcome {
            status: 503,
            error: Some("es_rejected_execution_exception".to_string()),
        };
        assert!(overloaded.is_transient_failure());
    }

    #[test]
    fn test_flush_summary_counts() {
        let summary = FlushSummary::from_items(vec![
            ItemOutcome {
                status: 200,
                error: None,
            },
            ItemOutcome {
                status: 400,
                error: Some("bad".to_string()),
            },
            ItemOutcome {
                status: 201,
                error: None,
            },
        ]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
    }
}
