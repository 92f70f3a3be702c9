use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use base64::prelude::*;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::AppError;

/// Untyped field map as held by the store.
pub type Fields = Map<String, Value>;

/// A record as returned by the store: its identity plus schemaless fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub id: String,
    pub fields: Fields,
}

impl RawRecord {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Decode into a typed record. The record id is exposed as the `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields)).map_err(|e| {
            AppError::BadRequest(format!("Malformed record '{}': {}", self.id, e))
        })
    }

    /// Value used for ordering on `field`. Missing fields sort first.
    pub fn sort_key(&self, field: &str) -> Value {
        self.fields.get(field).cloned().unwrap_or(Value::Null)
    }
}

/// Serialize a typed record into writable fields, dropping its `id`.
pub fn fields_of<T: Serialize>(record: &T) -> Result<Fields, AppError> {
    match serde_json::to_value(record) {
        Ok(Value::Object(mut fields)) => {
            fields.remove("id");
            Ok(fields)
        }
        Ok(other) => Err(AppError::Internal(format!(
            "Expected an object record, got {}",
            other
        ))),
        Err(e) => Err(AppError::Internal(format!("Failed to serialize record: {e}"))),
    }
}

/// Decode every record, skipping (and logging) those that fail validation.
pub fn decode_all<T: DeserializeOwned>(records: &[RawRecord]) -> Vec<T> {
    records
        .iter()
        .filter_map(|record| match record.decode::<T>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Skipping record: {e}");
                None
            }
        })
        .collect()
}

/// A single query constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `field == value`.
    Eq { field: String, value: Value },
    /// `field` is one of `values`.
    In { field: String, values: Vec<Value> },
    /// Array `field` shares at least one element with `values`.
    ArrayContainsAny { field: String, values: Vec<Value> },
    /// Record id is one of the given ids.
    IdIn(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Opaque continuation token for paged queries.
///
/// Wraps the sort key and id of the last record of a page; the next
/// page starts strictly after that position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    pub fn at(sort_key: &Value, id: &str) -> Self {
        let payload = serde_json::json!([sort_key, id]);
        Cursor(BASE64_URL_SAFE_NO_PAD.encode(payload.to_string()))
    }

    /// The (sort key, id) position this cursor points after.
    pub fn position(&self) -> Result<(Value, String), AppError> {
        let invalid = || AppError::BadRequest(format!("Invalid cursor '{}'", self.0));

        let bytes = BASE64_URL_SAFE_NO_PAD
            .decode(&self.0)
            .map_err(|_| invalid())?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
        match value {
            Value::Array(mut parts) if parts.len() == 2 => {
                let id = parts.pop().and_then(|v| v.as_str().map(str::to_string));
                let key = parts.pop().unwrap_or(Value::Null);
                id.map(|id| (key, id)).ok_or_else(invalid)
            }
            _ => Err(invalid()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Cursor {
    fn from(token: String) -> Self {
        Cursor(token)
    }
}

/// A collection query: filters, at most one sort key, a limit, a cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub start_after: Option<Cursor>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Option<Cursor>) -> Self {
        self.start_after = cursor;
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub records: Vec<RawRecord>,
    /// Position of the last record, `None` for an empty page.
    pub next_cursor: Option<Cursor>,
}

/// A live feed of full-collection snapshots.
///
/// Every item is the complete current content of the subscribed
/// collection. Dropping the subscription unsubscribes.
pub struct Subscription {
    snapshots: mpsc::UnboundedReceiver<Vec<RawRecord>>,
    teardown: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(snapshots: mpsc::UnboundedReceiver<Vec<RawRecord>>) -> Self {
        Self {
            snapshots,
            teardown: None,
        }
    }

    /// Run `teardown` when the subscription is dropped.
    pub fn on_drop(mut self, teardown: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.teardown = Some(Box::new(teardown));
        self
    }
}

impl Stream for Subscription {
    type Item = Vec<RawRecord>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.snapshots.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.snapshots.close();
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

/// The hosted document store collaborator.
///
/// Collections are addressed by path (`documents`, `users/{uid}/notes`).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Largest id list accepted by [`DocumentStore::get_by_ids`].
    fn max_batch_width(&self) -> usize;

    /// Run a query and return one page.
    async fn list(&self, collection: &str, query: &Query) -> Result<QueryPage, AppError>;

    /// Look up records by id. `ids` must not exceed the batch width;
    /// unknown ids are simply absent from the result.
    async fn get_by_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<RawRecord>, AppError>;

    /// Subscribe to full snapshots of a collection. The first snapshot
    /// is delivered immediately.
    async fn subscribe(&self, collection: &str) -> Result<Subscription, AppError>;

    /// Insert a record and return its generated id.
    async fn create(&self, collection: &str, fields: Fields) -> Result<String, AppError>;

    /// Overwrite the given fields of an existing record.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), AppError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), AppError>;

    /// Create the record if needed and merge `fields` into it.
    async fn upsert_merge(&self, collection: &str, id: &str, fields: Fields) -> Result<(), AppError>;
}

/// Fetch records by id, chunked to the store's batch width.
///
/// Issues one `get_by_ids` call per chunk and merges the results.
pub async fn fetch_by_ids(
    store: &dyn DocumentStore,
    collection: &str,
    ids: &[String],
) -> Result<HashMap<String, RawRecord>, AppError> {
    let mut records = HashMap::new();
    if ids.is_empty() {
        return Ok(records);
    }

    let width = store.max_batch_width().max(1);
    for chunk in ids.chunks(width) {
        for record in store.get_by_ids(collection, chunk).await? {
            records.insert(record.id.clone(), record);
        }
    }

    Ok(records)
}
