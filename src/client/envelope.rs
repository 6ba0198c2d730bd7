//! Response envelope handling
//!
//! The backend is inconsistent about wrapping payloads: the real value may
//! sit directly in the body, under `data`, or under `data.data`. Paginated
//! endpoints may add a `pagination` object next to either `data` level.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ClientError, Result};

/// Envelope field holding the payload
pub const DATA_FIELD: &str = "data";

/// Envelope field holding pagination metadata
pub const PAGINATION_FIELD: &str = "pagination";

/// One page of a collection endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u64>,
}

/// Pagination metadata as sent by the server
#[derive(Debug, Clone, Default, Deserialize)]
struct PaginationMeta {
    total: Option<u64>,
    page: Option<u64>,
    limit: Option<u64>,
    #[serde(alias = "totalPages", alias = "pages")]
    total_pages: Option<u64>,
}

fn take_data(value: &mut Value) -> Option<Value> {
    match value {
        Value::Object(map) => map.remove(DATA_FIELD),
        _ => None,
    }
}

fn has_data(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.contains_key(DATA_FIELD))
}

/// Strip up to two levels of `data` envelopes
pub fn unwrap(mut body: Value) -> Value {
    let Some(mut inner) = take_data(&mut body) else {
        return body;
    };
    if has_data(&inner) {
        if let Some(innermost) = take_data(&mut inner) {
            return innermost;
        }
    }
    inner
}

/// Find the pagination object at the outer or first envelope level
fn find_pagination(body: &Value) -> Option<PaginationMeta> {
    let candidate = body.get(PAGINATION_FIELD).or_else(|| {
        body.get(DATA_FIELD)
            .and_then(|inner| inner.get(PAGINATION_FIELD))
    })?;
    serde_json::from_value(candidate.clone()).ok()
}

/// Unwrap a paginated body into a [`Page`].
///
/// `total` comes from the pagination envelope when present, else from the
/// number of returned items.
pub fn paginate<T: DeserializeOwned>(body: Value) -> Result<Page<T>> {
    let meta = find_pagination(&body).unwrap_or_default();

    let items = match unwrap(body) {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => {
            return Err(ClientError::Decode(format!(
                "Expected a collection, got {}",
                kind_of(&other)
            )))
        }
    };

    let total = meta.total.unwrap_or(items.len() as u64);
    let items = items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<std::result::Result<Vec<T>, _>>()?;

    Ok(Page {
        items,
        total,
        page: meta.page,
        limit: meta.limit,
        total_pages: meta.total_pages,
    })
}

/// Best-effort human message from an error body
pub fn error_message(body: &Value) -> Option<String> {
    let candidates = [
        body.get("message"),
        body.get("error").and_then(|e| e.get("message")),
        body.get("error"),
        body.get("detail"),
        body.get(DATA_FIELD).and_then(|d| d.get("message")),
    ];

    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
