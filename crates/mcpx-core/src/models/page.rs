//! Cursor pagination

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{BackendError, BackendResult};
use crate::models::CapabilityKind;

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page. An empty cursor is stored as `None`.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self {
            items,
            next_cursor: next_cursor.filter(|c| !c.is_empty()),
        }
    }

    /// A page with no successor
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }
}

impl<T: DeserializeOwned> Page<T> {
    /// Decode a listing result such as `{"tools": [...], "nextCursor": "p2"}`
    pub fn from_result(kind: CapabilityKind, result: Value) -> BackendResult<Self> {
        let Value::Object(mut object) = result else {
            return Err(BackendError::Protocol(format!(
                "{} result is not an object",
                kind.list_method()
            )));
        };

        let items = match object.remove(kind.result_key()) {
            Some(Value::Null) | None => Vec::new(),
            Some(raw) => serde_json::from_value(raw).map_err(|e| {
                BackendError::Protocol(format!("invalid {} result: {}", kind.list_method(), e))
            })?,
        };

        let next_cursor = match object.remove("nextCursor") {
            Some(Value::String(cursor)) => Some(cursor),
            _ => None,
        };

        Ok(Self::new(items, next_cursor))
    }
}

/// Request parameters for a listing call at `cursor`
pub fn cursor_params(cursor: Option<&str>) -> Option<Value> {
    cursor.map(|c| json!({ "cursor": c }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tool;

    #[test]
    fn test_empty_cursor_is_none() {
        let page: Page<u8> = Page::new(vec![1], Some(String::new()));
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_from_result() {
        let page: Page<Tool> = Page::from_result(
            CapabilityKind::Tools,
            json!({"tools": [{"name": "a"}, {"name": "b"}], "nextCursor": "p2"}),
        )
        .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_cursor.as_deref(), Some("p2"));
    }

    #[test]
    fn test_missing_items_is_empty_page() {
        let page: Page<Tool> = Page::from_result(CapabilityKind::Tools, json!({})).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_non_object_result_rejected() {
        let result: BackendResult<Page<Tool>> =
            Page::from_result(CapabilityKind::Tools, json!([1, 2]));
        assert!(matches!(result, Err(BackendError::Protocol(_))));
    }
}
