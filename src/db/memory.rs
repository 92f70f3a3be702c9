use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::db::store::{
    Cursor, Direction, DocumentStore, Fields, Filter, OrderBy, Query, QueryPage, RawRecord,
    Subscription,
};
use crate::error::AppError;

/// Default id-lookup batch width, matching the hosted store's `in` limit.
pub const DEFAULT_BATCH_WIDTH: usize = 10;

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Fields>>,
    listeners: HashMap<String, Vec<mpsc::UnboundedSender<Vec<RawRecord>>>>,
}

impl Inner {
    fn snapshot(&self, collection: &str) -> Vec<RawRecord> {
        self.collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .map(|(id, fields)| RawRecord::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Push the current snapshot to every live subscriber, pruning closed ones.
    fn notify(&mut self, collection: &str) {
        let Some(listeners) = self.listeners.get(collection) else {
            return;
        };
        if listeners.is_empty() {
            return;
        }

        let snapshot = self.snapshot(collection);
        if let Some(listeners) = self.listeners.get_mut(collection) {
            listeners.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
    }
}

/// A complete in-process implementation of [`DocumentStore`].
///
/// Mirrors the hosted store's query semantics and delivers full-collection
/// snapshots to subscribers after every write.
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    batch_width: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_batch_width(DEFAULT_BATCH_WIDTH)
    }

    pub fn with_batch_width(batch_width: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            batch_width: batch_width.max(1),
        }
    }

    /// Insert or replace a record under a caller-chosen id.
    pub fn insert_with_id(&self, collection: &str, id: &str, fields: Fields) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        inner.notify(collection);
        Ok(())
    }

    /// Number of records currently in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        self.lock()
            .map(|inner| inner.collections.get(collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Number of open subscriptions on `collection`.
    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.lock()
            .map(|inner| {
                inner
                    .listeners
                    .get(collection)
                    .map_or(0, |l| l.iter().filter(|tx| !tx.is_closed()).count())
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::Internal("In-memory store poisoned".into()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Order two (sort key, id) positions under `order`. Ties break on id.
fn compare_positions(
    order: Option<&OrderBy>,
    a: (&Value, &str),
    b: (&Value, &str),
) -> Ordering {
    let primary = match order {
        Some(o) if o.direction == Direction::Descending => compare_values(b.0, a.0),
        Some(_) => compare_values(a.0, b.0),
        None => Ordering::Equal,
    };
    primary.then_with(|| a.1.cmp(b.1))
}

fn matches(record: &RawRecord, filter: &Filter) -> bool {
    match filter {
        Filter::Eq { field, value } => record.fields.get(field) == Some(value),
        Filter::In { field, values } => record
            .fields
            .get(field)
            .is_some_and(|v| values.contains(v)),
        Filter::ArrayContainsAny { field, values } => match record.fields.get(field) {
            Some(Value::Array(items)) => items.iter().any(|item| values.contains(item)),
            _ => false,
        },
        Filter::IdIn(ids) => ids.contains(&record.id),
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn max_batch_width(&self) -> usize {
        self.batch_width
    }

    async fn list(&self, collection: &str, query: &Query) -> Result<QueryPage, AppError> {
        let mut records = self.lock()?.snapshot(collection);
        let order = query.order_by.as_ref();
        let key_of = |r: &RawRecord| match order {
            Some(o) => r.sort_key(&o.field),
            None => Value::Null,
        };

        records.retain(|r| query.filters.iter().all(|f| matches(r, f)));
        records.sort_by(|a, b| {
            compare_positions(order, (&key_of(a), a.id.as_str()), (&key_of(b), b.id.as_str()))
        });

        if let Some(cursor) = &query.start_after {
            let (key, id) = cursor.position()?;
            records.retain(|r| {
                compare_positions(order, (&key_of(r), r.id.as_str()), (&key, id.as_str()))
                    == Ordering::Greater
            });
        }

        if let Some(limit) = query.limit {
            records.truncate(limit);
        }

        let next_cursor = records.last().map(|r| Cursor::at(&key_of(r), &r.id));
        Ok(QueryPage {
            records,
            next_cursor,
        })
    }

    async fn get_by_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<RawRecord>, AppError> {
        if ids.len() > self.batch_width {
            return Err(AppError::BadRequest(format!(
                "Id lookup of {} ids exceeds the batch width of {}",
                ids.len(),
                self.batch_width
            )));
        }

        let inner = self.lock()?;
        let Some(records) = inner.collections.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .iter()
            .filter_map(|id| {
                records
                    .get(id)
                    .map(|fields| RawRecord::new(id.clone(), fields.clone()))
            })
            .collect())
    }

    async fn subscribe(&self, collection: &str) -> Result<Subscription, AppError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock()?;

        // Initial snapshot, delivered before any write notification.
        let _ = tx.send(inner.snapshot(collection));
        inner
            .listeners
            .entry(collection.to_string())
            .or_default()
            .push(tx);

        Ok(Subscription::new(rx))
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<String, AppError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut inner = self.lock()?;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);
        inner.notify(collection);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        let record = inner
            .collections
            .get_mut(collection)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| AppError::NotFound(format!("{}/{}", collection, id)))?;
        record.extend(fields);
        inner.notify(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|records| records.remove(id));
        if removed.is_some() {
            inner.notify(collection);
        }
        Ok(())
    }

    async fn upsert_merge(&self, collection: &str, id: &str, fields: Fields) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default()
            .extend(fields);
        inner.notify(collection);
        Ok(())
    }
}
