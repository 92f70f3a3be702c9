use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::models::Document;
use crate::db::store::{Cursor, Direction, Filter, Query};

/// Field the catalog is ordered by.
pub const CREATED_AT: &str = "createdAt";

/// Result ordering by creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl SortOrder {
    /// Parse a sort key; anything unrecognised means newest first.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "oldest" => SortOrder::Oldest,
            _ => SortOrder::Newest,
        }
    }

    fn direction(self) -> Direction {
        match self {
            SortOrder::Newest => Direction::Descending,
            SortOrder::Oldest => Direction::Ascending,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Newest => write!(f, "newest"),
            SortOrder::Oldest => write!(f, "oldest"),
        }
    }
}

/// Store-side constraints selected in the search UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Major id; `None` means any major.
    pub major: Option<String>,
    /// Tag ids; a document matches if it carries any of them.
    pub tags: Vec<String>,
    pub sort: SortOrder,
}

/// A single filter change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterChange {
    Major(Option<String>),
    Tags(Vec<String>),
    Sort(SortOrder),
}

impl SearchFilters {
    pub fn apply(&mut self, change: FilterChange) {
        match change {
            FilterChange::Major(major) => self.major = major.filter(|m| !m.is_empty()),
            FilterChange::Tags(tags) => self.tags = tags,
            FilterChange::Sort(sort) => self.sort = sort,
        }
    }
}

/// Build the store query for one page.
///
/// The free-text term is never part of the store query; see [`filter_by_term`].
pub fn build_query(filters: &SearchFilters, page_size: usize, cursor: Option<Cursor>) -> Query {
    let mut query = Query::new();

    if let Some(major) = &filters.major {
        query = query.filter(Filter::Eq {
            field: "major".into(),
            value: Value::String(major.clone()),
        });
    }

    if !filters.tags.is_empty() {
        query = query.filter(Filter::ArrayContainsAny {
            field: "tags".into(),
            values: filters.tags.iter().cloned().map(Value::String).collect(),
        });
    }

    query
        .order_by(CREATED_AT, filters.sort.direction())
        .limit(page_size)
        .start_after(cursor)
}

/// Keep the documents whose title or description contains `term`,
/// case-insensitively, preserving order. An empty term keeps everything.
pub fn filter_by_term(documents: Vec<Document>, term: &str) -> Vec<Document> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return documents;
    }
    documents
        .into_iter()
        .filter(|doc| doc.matches_lowercase(&needle))
        .collect()
}
