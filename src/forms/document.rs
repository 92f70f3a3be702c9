use std::collections::HashMap;

use serde::Serialize;
use serde_json::json;
use validator::Validate;

use crate::auth::gate::AuthGate;
use crate::db::models::{now_millis, Document, Major, Tag};
use crate::db::repository::CatalogRepository;
use crate::db::store::{Direction, Fields, Filter, Query};
use crate::error::{AppError, FieldErrors};
use crate::mirror::cache::DocumentCache;
use crate::search::query::CREATED_AT;

/// A major or tag picked in the admin form: either an existing record
/// or a name typed in that is created on submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TaxonomyChoice {
    Existing(String),
    New(String),
}

/// The create/edit form for a catalog document.
#[derive(Debug, Clone, Default, PartialEq, Validate)]
pub struct DocumentDraft {
    #[validate(length(min = 5, max = 200, message = "Title must be between 5 and 200 characters"))]
    pub title: String,
    #[validate(required(message = "Major is required"))]
    pub major: Option<TaxonomyChoice>,
    #[validate(length(
        min = 50,
        max = 2000,
        message = "Description must be between 50 and 2000 characters"
    ))]
    pub description: String,
    #[validate(length(min = 1, message = "Select at least one tag"))]
    pub tags: Vec<TaxonomyChoice>,
    #[validate(url(message = "Document link must be a valid URL"))]
    pub document_link: String,
}

/// A document row in the admin list.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminDocumentRow {
    pub document: Document,
    /// Display name of the major, or its raw id when the major is gone.
    pub major_name: String,
}

/// Catalog management for administrators.
///
/// Every write requires a signed-in session. Edits and deletions are
/// reflected in the shared document cache.
#[derive(Clone)]
pub struct AdminCatalog {
    repo: CatalogRepository,
    gate: AuthGate,
    cache: DocumentCache,
}

impl AdminCatalog {
    pub fn new(repo: CatalogRepository, gate: AuthGate, cache: DocumentCache) -> Self {
        Self { repo, gate, cache }
    }

    pub async fn majors(&self) -> Result<Vec<Major>, AppError> {
        self.repo.majors().await
    }

    /// Tag suggestions, most used first.
    pub async fn popular_tags(&self) -> Result<Vec<Tag>, AppError> {
        self.repo.popular_tags().await
    }

    pub async fn create_major(&self, name: &str) -> Result<Major, AppError> {
        self.gate.require_user("create majors")?;
        self.repo.create_major(name.trim()).await
    }

    pub async fn create_tag(&self, name: &str) -> Result<Tag, AppError> {
        self.gate.require_user("create tags")?;
        self.repo.create_tag(name.trim()).await
    }

    pub async fn create_document(&self, draft: &DocumentDraft) -> Result<Document, AppError> {
        self.gate.require_user("add documents")?;
        draft.validate()?;
        let (major, tags) = self.resolve_taxonomy(draft).await?;

        let doc = Document {
            id: String::new(),
            title: draft.title.clone(),
            major,
            description: draft.description.clone(),
            tags,
            document_link: draft.document_link.clone(),
            created_at: now_millis(),
        };
        self.repo.create_document(doc).await
    }

    /// Rewrite the editable fields of `id`. The creation time is kept.
    pub async fn update_document(&self, id: &str, draft: &DocumentDraft) -> Result<(), AppError> {
        self.gate.require_user("edit documents")?;
        draft.validate()?;
        let (major, tags) = self.resolve_taxonomy(draft).await?;

        let mut fields = Fields::new();
        fields.insert("title".into(), json!(draft.title));
        fields.insert("major".into(), json!(major));
        fields.insert("description".into(), json!(draft.description));
        fields.insert("tags".into(), json!(tags));
        fields.insert("documentLink".into(), json!(draft.document_link));
        self.repo.update_document(id, fields).await?;

        match self.repo.find_document(id).await? {
            Some(doc) => self.cache.insert(doc),
            None => {
                self.cache.remove(id);
            }
        }
        Ok(())
    }

    pub async fn delete_document(&self, id: &str) -> Result<(), AppError> {
        self.gate.require_user("delete documents")?;
        self.repo.delete_document(id).await?;
        self.cache.remove(id);
        Ok(())
    }

    /// Admin lookup. A blank term lists everything; a term naming a major
    /// lists that major's documents; any other term matches descriptions.
    pub async fn find_documents(&self, term: &str) -> Result<Vec<AdminDocumentRow>, AppError> {
        let term = term.trim();
        let newest_first = Query::new().order_by(CREATED_AT, Direction::Descending);

        let documents = if term.is_empty() {
            self.repo.query_documents(&newest_first).await?.1
        } else {
            let named = self.repo.majors_named(term).await?;
            if named.is_empty() {
                let needle = term.to_lowercase();
                let (_, all) = self.repo.query_documents(&newest_first).await?;
                all.into_iter()
                    .filter(|doc| doc.description.to_lowercase().contains(&needle))
                    .collect()
            } else {
                let query = newest_first.filter(Filter::In {
                    field: "major".into(),
                    values: named.into_iter().map(|m| json!(m.id)).collect(),
                });
                self.repo.query_documents(&query).await?.1
            }
        };

        let names: HashMap<String, String> = self
            .repo
            .majors()
            .await?
            .into_iter()
            .map(|m| (m.id, m.name))
            .collect();

        Ok(documents
            .into_iter()
            .map(|document| {
                let major_name = names
                    .get(&document.major)
                    .cloned()
                    .unwrap_or_else(|| document.major.clone());
                AdminDocumentRow {
                    document,
                    major_name,
                }
            })
            .collect())
    }

    /// A draft pre-filled from `doc`, for the edit form.
    pub fn draft_for(&self, doc: &Document) -> DocumentDraft {
        DocumentDraft {
            title: doc.title.clone(),
            major: Some(TaxonomyChoice::Existing(doc.major.clone())),
            description: doc.description.clone(),
            tags: doc
                .tags
                .iter()
                .cloned()
                .map(TaxonomyChoice::Existing)
                .collect(),
            document_link: doc.document_link.clone(),
        }
    }

    /// Turn the draft's choices into ids, creating typed-in majors and tags.
    async fn resolve_taxonomy(&self, draft: &DocumentDraft) -> Result<(String, Vec<String>), AppError> {
        let mut errors = FieldErrors::new();
        if let Some(TaxonomyChoice::New(name)) = &draft.major {
            if name.trim().is_empty() {
                errors.add("major", "Major is required");
            }
        }
        if draft
            .tags
            .iter()
            .any(|t| matches!(t, TaxonomyChoice::New(name) if name.trim().is_empty()))
        {
            errors.add("tags", "Tag names must not be blank");
        }
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        let major = match &draft.major {
            Some(TaxonomyChoice::Existing(id)) => id.clone(),
            Some(TaxonomyChoice::New(name)) => self.repo.create_major(name.trim()).await?.id,
            None => {
                let mut errors = FieldErrors::new();
                errors.add("major", "Major is required");
                return Err(AppError::Validation(errors));
            }
        };

        let mut tags = Vec::with_capacity(draft.tags.len());
        for choice in &draft.tags {
            let id = match choice {
                TaxonomyChoice::Existing(id) => id.clone(),
                TaxonomyChoice::New(name) => self.repo.create_tag(name.trim()).await?.id,
            };
            tags.push(id);
        }

        Ok((major, tags))
    }
}
