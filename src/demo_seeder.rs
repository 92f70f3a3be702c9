use std::collections::{HashMap, HashSet};

use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::db::models::{Document, TAGS};
use crate::db::repository::CatalogRepository;
use crate::db::store::{Fields, Query};
use crate::error::AppError;

const DEMO_CATALOG: &str = include_str!("../demo_data/catalog.json");

#[derive(Debug, Deserialize)]
struct DemoCatalog {
    majors: Vec<DemoMajor>,
    tags: Vec<DemoTag>,
    documents: Vec<DemoDocument>,
}

#[derive(Debug, Deserialize)]
struct DemoMajor {
    key: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DemoTag {
    key: String,
    name: String,
    count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DemoDocument {
    title: String,
    major: String,
    description: String,
    tags: Vec<String>,
    document_link: String,
    created_at: i64,
}

/// What a seeding run created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub majors: usize,
    pub tags: usize,
    pub documents: usize,
}

/// Load the embedded demo catalog. Majors and tags are matched by name
/// and documents by title, so running it twice creates nothing new.
pub async fn seed_demo_catalog(repo: &CatalogRepository) -> Result<SeedReport, AppError> {
    tracing::info!("Starting demo data seeding...");

    let catalog: DemoCatalog = serde_json::from_str(DEMO_CATALOG)
        .map_err(|e| AppError::Internal(format!("Embedded demo catalog is invalid: {e}")))?;
    let mut report = SeedReport::default();

    let mut majors = HashMap::new();
    for major in &catalog.majors {
        let id = match repo.majors_named(&major.name).await?.into_iter().next() {
            Some(existing) => existing.id,
            None => {
                report.majors += 1;
                repo.create_major(&major.name).await?.id
            }
        };
        majors.insert(major.key.as_str(), id);
    }

    let existing_tags: HashMap<String, String> = repo
        .tags()
        .await?
        .into_iter()
        .map(|t| (t.name, t.id))
        .collect();
    let mut tags = HashMap::new();
    for tag in &catalog.tags {
        let id = match existing_tags.get(&tag.name) {
            Some(id) => id.clone(),
            None => {
                let id = repo.create_tag(&tag.name).await?.id;
                if tag.count > 1 {
                    let mut fields = Fields::new();
                    fields.insert("count".into(), json!(tag.count));
                    repo.store().update(TAGS, &id, fields).await?;
                }
                report.tags += 1;
                id
            }
        };
        tags.insert(tag.key.as_str(), id);
    }

    let titles: HashSet<String> = repo
        .query_documents(&Query::new())
        .await?
        .1
        .into_iter()
        .map(|d| d.title)
        .collect();

    for demo in catalog.documents {
        if titles.contains(&demo.title) {
            tracing::info!("Document '{}' already exists, skipping.", demo.title);
            continue;
        }

        let major = majors.get(demo.major.as_str()).cloned().ok_or_else(|| {
            AppError::Internal(format!("Demo document '{}' has unknown major", demo.title))
        })?;
        let doc_tags = demo
            .tags
            .iter()
            .map(|key| {
                tags.get(key.as_str()).cloned().ok_or_else(|| {
                    AppError::Internal(format!("Demo document '{}' has unknown tag '{key}'", demo.title))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let created_at = Utc
            .timestamp_millis_opt(demo.created_at)
            .single()
            .ok_or_else(|| AppError::Internal(format!("Bad timestamp on '{}'", demo.title)))?;

        repo.create_document(Document {
            id: String::new(),
            title: demo.title,
            major,
            description: demo.description,
            tags: doc_tags,
            document_link: demo.document_link,
            created_at,
        })
        .await?;
        report.documents += 1;
    }

    tracing::info!(
        majors = report.majors,
        tags = report.tags,
        documents = report.documents,
        "Demo data seeding complete."
    );
    Ok(report)
}
