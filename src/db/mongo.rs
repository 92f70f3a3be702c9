use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mongodb::bson::{self, doc, Bson, Document as BsonDocument};
use mongodb::options::{FindOptions, UpdateOptions};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::db::store::{
    Cursor, Direction, DocumentStore, Fields, Filter, Query, QueryPage, RawRecord, Subscription,
};
use crate::error::AppError;

/// MongoDB implementation of [`DocumentStore`].
///
/// Collection paths map to collection names with `/` replaced by `.`
/// (`users/u1/notes` -> `users.u1.notes`). Record ids are stored as
/// string `_id`s. Subscriptions use change streams, so the server must
/// run as a replica set.
pub struct MongoStore {
    db: mongodb::Database,
    batch_width: usize,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str, batch_width: usize) -> Result<Self, AppError> {
        let client = mongodb::Client::with_uri_str(uri).await.map_err(network)?;
        Ok(Self::new(client.database(database), batch_width))
    }

    pub fn new(db: mongodb::Database, batch_width: usize) -> Self {
        Self {
            db,
            batch_width: batch_width.max(1),
        }
    }

    fn collection(&self, path: &str) -> mongodb::Collection<BsonDocument> {
        self.db.collection(&path.replace('/', "."))
    }
}

fn network(e: mongodb::error::Error) -> AppError {
    AppError::Network(e.to_string())
}

fn to_bson(value: &Value) -> Result<Bson, AppError> {
    bson::to_bson(value).map_err(|e| AppError::BadRequest(format!("Unsupported value: {e}")))
}

fn to_bson_array(values: &[Value]) -> Result<Bson, AppError> {
    values
        .iter()
        .map(to_bson)
        .collect::<Result<Vec<_>, _>>()
        .map(Bson::Array)
}

fn to_bson_document(fields: &Fields) -> Result<BsonDocument, AppError> {
    bson::to_document(fields).map_err(|e| AppError::BadRequest(format!("Unsupported record: {e}")))
}

fn single(field: &str, value: Bson) -> BsonDocument {
    let mut d = BsonDocument::new();
    d.insert(field.to_string(), value);
    d
}

fn to_record(mut raw: BsonDocument) -> Option<RawRecord> {
    let id = match raw.remove("_id")? {
        Bson::String(s) => s,
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    };
    match Bson::Document(raw).into_relaxed_extjson() {
        Value::Object(fields) => Some(RawRecord::new(id, fields)),
        _ => None,
    }
}

/// Translate query constraints (including the cursor) into a filter document.
fn filter_document(query: &Query) -> Result<BsonDocument, AppError> {
    let mut clauses = Vec::new();

    for filter in &query.filters {
        let clause = match filter {
            Filter::Eq { field, value } => single(field, to_bson(value)?),
            Filter::In { field, values } | Filter::ArrayContainsAny { field, values } => {
                // `$in` on an array field matches when any element is listed.
                single(field, Bson::Document(single("$in", to_bson_array(values)?)))
            }
            Filter::IdIn(ids) => doc! { "_id": { "$in": ids.clone() } },
        };
        clauses.push(clause);
    }

    if let Some(cursor) = &query.start_after {
        let (key, id) = cursor.position()?;
        let clause = match &query.order_by {
            Some(order) => {
                let op = match order.direction {
                    Direction::Ascending => "$gt",
                    Direction::Descending => "$lt",
                };
                let beyond = single(&order.field, Bson::Document(single(op, to_bson(&key)?)));
                let mut tie = single(&order.field, to_bson(&key)?);
                tie.insert("_id", doc! { "$gt": id });
                doc! { "$or": [beyond, tie] }
            }
            None => doc! { "_id": { "$gt": id } },
        };
        clauses.push(clause);
    }

    Ok(if clauses.is_empty() {
        doc! {}
    } else {
        doc! { "$and": clauses }
    })
}

fn sort_document(query: &Query) -> BsonDocument {
    let mut sort = BsonDocument::new();
    if let Some(order) = &query.order_by {
        let direction = match order.direction {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        };
        sort.insert(order.field.clone(), direction);
    }
    sort.insert("_id", 1);
    sort
}

async fn find_records(
    collection: &mongodb::Collection<BsonDocument>,
    filter: BsonDocument,
    options: FindOptions,
) -> Result<Vec<RawRecord>, AppError> {
    let mut cursor = collection
        .find(filter)
        .with_options(options)
        .await
        .map_err(network)?;

    let mut records = Vec::new();
    while let Some(raw) = cursor.try_next().await.map_err(network)? {
        if let Some(record) = to_record(raw) {
            records.push(record);
        }
    }
    Ok(records)
}

async fn read_all(collection: &mongodb::Collection<BsonDocument>) -> Result<Vec<RawRecord>, AppError> {
    let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
    find_records(collection, doc! {}, options).await
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn max_batch_width(&self) -> usize {
        self.batch_width
    }

    async fn list(&self, collection: &str, query: &Query) -> Result<QueryPage, AppError> {
        let options = FindOptions::builder()
            .sort(sort_document(query))
            .limit(query.limit.map(|l| l as i64))
            .build();

        let records =
            find_records(&self.collection(collection), filter_document(query)?, options).await?;

        let next_cursor = records.last().map(|r| {
            let key = query
                .order_by
                .as_ref()
                .map(|o| r.sort_key(&o.field))
                .unwrap_or(Value::Null);
            Cursor::at(&key, &r.id)
        });

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

        let filter = doc! { "_id": { "$in": ids.to_vec() } };
        find_records(&self.collection(collection), filter, FindOptions::default()).await
    }

    async fn subscribe(&self, collection: &str) -> Result<Subscription, AppError> {
        let coll = self.collection(collection);
        let (tx, rx) = mpsc::unbounded_channel();

        let changes = coll.watch().await.map_err(network)?;
        let _ = tx.send(read_all(&coll).await?);

        let path = collection.to_string();
        let task = tokio::spawn(async move {
            let mut changes = Box::pin(changes);
            while let Some(event) = changes.next().await {
                if let Err(e) = event {
                    tracing::warn!("Change stream on '{}' failed: {e}", path);
                    break;
                }
                match read_all(&coll).await {
                    Ok(snapshot) => {
                        if tx.send(snapshot).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to refresh snapshot of '{}': {e}", path);
                        break;
                    }
                }
            }
        });

        let abort = task.abort_handle();
        Ok(Subscription::new(rx).on_drop(move || abort.abort()))
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<String, AppError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut record = to_bson_document(&fields)?;
        record.insert("_id", id.clone());

        self.collection(collection)
            .insert_one(record)
            .await
            .map_err(network)?;

        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), AppError> {
        let result = self
            .collection(collection)
            .update_one(doc! { "_id": id }, doc! { "$set": to_bson_document(&fields)? })
            .await
            .map_err(network)?;

        if result.matched_count == 0 {
            return Err(AppError::NotFound(format!("{}/{}", collection, id)));
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), AppError> {
        self.collection(collection)
            .delete_one(doc! { "_id": id })
            .await
            .map_err(network)?;
        Ok(())
    }

    async fn upsert_merge(&self, collection: &str, id: &str, fields: Fields) -> Result<(), AppError> {
        if fields.is_empty() {
            return Err(AppError::BadRequest("Nothing to merge".into()));
        }

        let options = UpdateOptions::builder().upsert(true).build();
        self.collection(collection)
            .update_one(doc! { "_id": id }, doc! { "$set": to_bson_document(&fields)? })
            .with_options(options)
            .await
            .map_err(network)?;
        Ok(())
    }
}
