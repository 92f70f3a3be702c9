use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::db::models::{truncate_to_millis, Document, Major, Tag, DOCUMENTS, MAJORS, TAGS};
use crate::db::store::{
    decode_all, fetch_by_ids, fields_of, Direction, DocumentStore, Fields, Filter, Query,
    QueryPage,
};
use crate::error::AppError;

/// Number of tag suggestions offered by the admin forms.
pub const POPULAR_TAG_LIMIT: usize = 20;

/// Typed access to the shared catalog collections.
///
/// Wraps a [`DocumentStore`] and validates every record it hands out.
#[derive(Clone)]
pub struct CatalogRepository {
    store: Arc<dyn DocumentStore>,
}

impl CatalogRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// List all majors.
    pub async fn majors(&self) -> Result<Vec<Major>, AppError> {
        let page = self.store.list(MAJORS, &Query::new()).await?;
        Ok(decode_all(&page.records))
    }

    /// Majors whose name is exactly `name`. Names are not unique.
    pub async fn majors_named(&self, name: &str) -> Result<Vec<Major>, AppError> {
        let query = Query::new().filter(Filter::Eq {
            field: "name".into(),
            value: Value::String(name.to_string()),
        });
        let page = self.store.list(MAJORS, &query).await?;
        Ok(decode_all(&page.records))
    }

    /// List all tags.
    pub async fn tags(&self) -> Result<Vec<Tag>, AppError> {
        let page = self.store.list(TAGS, &Query::new()).await?;
        Ok(decode_all(&page.records))
    }

    /// The most used tags, most popular first.
    pub async fn popular_tags(&self) -> Result<Vec<Tag>, AppError> {
        let query = Query::new()
            .order_by("count", Direction::Descending)
            .limit(POPULAR_TAG_LIMIT);
        let page = self.store.list(TAGS, &query).await?;
        Ok(decode_all(&page.records))
    }

    /// Create a major on first use. Does not check for an existing name.
    pub async fn create_major(&self, name: &str) -> Result<Major, AppError> {
        let mut fields = Fields::new();
        fields.insert("name".into(), json!(name));
        let id = self.store.create(MAJORS, fields).await?;
        tracing::info!("Created major '{}' ({})", name, id);
        Ok(Major {
            id,
            name: name.to_string(),
        })
    }

    /// Create a tag on first use with a usage count of one.
    pub async fn create_tag(&self, name: &str) -> Result<Tag, AppError> {
        let mut fields = Fields::new();
        fields.insert("name".into(), json!(name));
        fields.insert("count".into(), json!(1));
        let id = self.store.create(TAGS, fields).await?;
        tracing::info!("Created tag '{}' ({})", name, id);
        Ok(Tag {
            id,
            name: name.to_string(),
            count: 1,
        })
    }

    /// Run a documents query, returning the raw page alongside the
    /// records that passed typed decoding.
    pub async fn query_documents(&self, query: &Query) -> Result<(QueryPage, Vec<Document>), AppError> {
        let page = self.store.list(DOCUMENTS, query).await?;
        let documents = decode_all(&page.records);
        Ok((page, documents))
    }

    /// Find a single document by id.
    pub async fn find_document(&self, id: &str) -> Result<Option<Document>, AppError> {
        let records = self
            .store
            .get_by_ids(DOCUMENTS, &[id.to_string()])
            .await?;
        records.first().map(|r| r.decode()).transpose()
    }

    /// Resolve document ids in batches. Missing or malformed ids are absent.
    pub async fn documents_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Document>, AppError> {
        let records = fetch_by_ids(self.store.as_ref(), DOCUMENTS, ids).await?;
        Ok(records
            .into_iter()
            .filter_map(|(id, record)| match record.decode::<Document>() {
                Ok(doc) => Some((id, doc)),
                Err(e) => {
                    tracing::warn!("Skipping document: {e}");
                    None
                }
            })
            .collect())
    }

    /// Insert a document, returning it as stored, with its store-assigned id.
    pub async fn create_document(&self, mut doc: Document) -> Result<Document, AppError> {
        doc.created_at = truncate_to_millis(doc.created_at);
        let fields = fields_of(&doc)?;
        doc.id = self.store.create(DOCUMENTS, fields).await?;
        tracing::info!("Created document '{}' ({})", doc.title, doc.id);
        Ok(doc)
    }

    /// Overwrite the given fields of a document.
    pub async fn update_document(&self, id: &str, fields: Fields) -> Result<(), AppError> {
        self.store.update(DOCUMENTS, id, fields).await?;
        tracing::info!("Updated document {}", id);
        Ok(())
    }

    /// Delete a document. Bookmarks and notes pointing at it are left in place.
    pub async fn delete_document(&self, id: &str) -> Result<(), AppError> {
        self.store.delete(DOCUMENTS, id).await?;
        tracing::info!("Deleted document {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryStore;
    use chrono::{TimeZone, Utc};

    fn repo_with_width(width: usize) -> CatalogRepository {
        CatalogRepository::new(Arc::new(InMemoryStore::with_batch_width(width)))
    }

    fn sample_doc(title: &str) -> Document {
        Document {
            id: String::new(),
            title: title.to_string(),
            major: "m1".to_string(),
            description: "Mô tả".to_string(),
            tags: vec!["t1".to_string()],
            document_link: "https://example.edu/doc.pdf".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_find_document() {
        let repo = repo_with_width(10);
        let created = repo.create_document(sample_doc("Cơ học lượng tử")).await.unwrap();
        assert!(!created.id.is_empty());

        let found = repo.find_document(&created.id).await.unwrap().unwrap();
        assert_eq!(found, created);
        assert!(repo.find_document("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_created_document_matches_stored_record() {
        let repo = repo_with_width(10);
        let mut doc = sample_doc("Nhiệt động lực học");
        doc.created_at = Utc.timestamp_opt(1_700_000_000, 781_331_459).unwrap();

        let created = repo.create_document(doc).await.unwrap();
        assert_eq!(created.created_at.timestamp_subsec_nanos(), 781_000_000);
        let found = repo.find_document(&created.id).await.unwrap().unwrap();
        assert_eq!(found, created);
    }

    #[tokio::test]
    async fn test_documents_by_ids_spans_batches() {
        let repo = repo_with_width(2);
        let mut ids = Vec::new();
        for i in 0..5 {
            let doc = repo.create_document(sample_doc(&format!("Doc {i}"))).await.unwrap();
            ids.push(doc.id);
        }
        ids.push("missing".to_string());

        let found = repo.documents_by_ids(&ids).await.unwrap();
        assert_eq!(found.len(), 5);
    }

    #[tokio::test]
    async fn test_duplicate_major_names_are_allowed() {
        let repo = repo_with_width(10);
        let first = repo.create_major("Vật lý").await.unwrap();
        let second = repo.create_major("Vật lý").await.unwrap();
        assert_ne!(first.id, second.id);

        let named = repo.majors_named("Vật lý").await.unwrap();
        assert_eq!(named.len(), 2);
        assert_eq!(repo.majors().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_popular_tags_ordering() {
        let store = Arc::new(InMemoryStore::new());
        for (id, count) in [("a", 3), ("b", 9), ("c", 1)] {
            let mut fields = Fields::new();
            fields.insert("name".into(), json!(id));
            fields.insert("count".into(), json!(count));
            store.insert_with_id(TAGS, id, fields).unwrap();
        }
        let repo = CatalogRepository::new(store);

        let tags = repo.popular_tags().await.unwrap();
        let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);

        let created = repo.create_tag("mới").await.unwrap();
        assert_eq!(created.count, 1);
    }
}
