//! Ordered staging area for bulkable actions.
//!
//! Only the processor touches the buffer; no locking is needed. Elements
//! keep their broker delivery order, and only bulkable elements are
//! accepted. The batch-size bound itself is enforced by the processor
//! together with the broker's prefetch window.

use crate::action::{ActionElement, ActionError, ActionKind};

/// Insertion-ordered collection of buffered bulkable actions.
#[derive(Debug, Default)]
pub struct ActionBuffer {
    elements: Vec<ActionElement>,
}

impl ActionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bulkable element at the tail.
    ///
    /// Rejects non-bulkable elements; those bypass the buffer entirely.
    pub fn append(&mut self, element: ActionElement) -> Result<(), ActionError> {
        if element.kind() != ActionKind::Bulkable {
            return Err(ActionError::Unsupported {
                requested: "buffering",
                actual: element.kind(),
            });
        }
        self.elements.push(element);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The buffered elements in insertion order.
    pub fn elements(&self) -> &[ActionElement] {
        &self.elements
    }

    /// Delivery tags of the buffered elements, in insertion order.
    pub fn delivery_tags(&self) -> Vec<u64> {
        self.elements.iter().map(|e| e.delivery_tag()).collect()
    }

    /// Drop all buffered elements. Does not touch the broker.
    pub fn clear(&mut self) {
        self.elements.clear();
    }

    /// Keep only the elements the predicate accepts, preserving order.
    ///
    /// Used after a partial bulk failure to hold the failed elements for
    /// the next flush.
    pub fn retain(&mut self, keep: impl FnMut(&ActionElement) -> bool) {
        self.elements.retain(keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bulkable(tag: u64) -> ActionElement {
        let body = json!({"op": "index", "index": "events", "body": {"n": tag}});
        ActionElement::parse(tag, serde_json::to_vec(&body).unwrap()).unwrap()
    }

    fn lifecycle(tag: u64) -> ActionElement {
        let body = json!({"op": "indices_create", "index": "events"});
        ActionElement::parse(tag, serde_json::to_vec(&body).unwrap()).unwrap()
    }

    #[test]
    fn test_append_preserves_order() {
        let mut buffer = ActionBuffer::new();
        for tag in [11, 12, 13] {
            buffer.append(bulkable(tag)).unwrap();
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.delivery_tags(), vec![11, 12, 13]);
    }

    #[test]
    fn test_append_rejects_non_bulkable() {
        let mut buffer = ActionBuffer::new();
        assert!(buffer.append(lifecycle(1)).is_err());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_clear_empties_buffer() {
        let mut buffer = ActionBuffer::new();
        buffer.append(bulkable(1)).unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_retain_keeps_failed_subset_in_order() {
        let mut buffer = ActionBuffer::new();
        for tag in [5, 6, 7] {
            buffer.append(bulkable(tag)).unwrap();
        }
        buffer.retain(|e| e.delivery_tag() != 6);
        assert_eq!(buffer.delivery_tags(), vec![5, 7]);
    }
}
