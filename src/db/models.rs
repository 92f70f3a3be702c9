use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store collection holding the catalog.
pub const DOCUMENTS: &str = "documents";
/// Store collection holding majors.
pub const MAJORS: &str = "majors";
/// Store collection holding tags.
pub const TAGS: &str = "tags";
/// Store collection holding borrow requests.
pub const BORROW_REQUESTS: &str = "borrowRequests";
/// Per-user sub-collection holding bookmarks.
pub const BOOKMARKS: &str = "bookmarks";
/// Per-user sub-collection holding notes.
pub const NOTES: &str = "notes";

/// A catalog entry, stored in the `documents` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Store-assigned identity. Never written back as a field.
    pub id: String,
    pub title: String,
    /// Id of the document's major.
    pub major: String,
    pub description: String,
    /// Tag ids, in the order the admin entered them.
    #[serde(default)]
    pub tags: Vec<String>,
    /// External link to the document itself.
    #[serde(default, alias = "link")]
    pub document_link: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Case-insensitive substring match over title and description.
    ///
    /// `needle` must already be lower-cased.
    pub fn matches_lowercase(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
    }
}

/// A field of study. Created on first use by the admin forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Major {
    pub id: String,
    pub name: String,
}

/// A free-form label. Created on first use by the admin forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    /// Popularity counter used to rank tag suggestions.
    #[serde(default)]
    pub count: u64,
}

/// Lifecycle of a borrow request. Only `Pending` is ever written here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorrowStatus {
    Pending,
    Approved,
    Rejected,
}

/// A request by a signed-in user to borrow a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowRequest {
    pub id: String,
    pub document_id: String,
    /// Title copied at submission time.
    pub document_title: String,
    pub user_id: String,
    pub user_email: String,
    pub reason: String,
    pub borrow_period: String,
    pub status: BorrowStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Presence of this record means the document is bookmarked.
///
/// Keyed by the bookmarked document's id under `users/{uid}/bookmarks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: String,
    pub doc_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub added_at: DateTime<Utc>,
}

/// A user's note on a document. At most one per (user, document).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub doc_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Drop sub-millisecond precision, matching what the store keeps.
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// The current time at store precision.
pub fn now_millis() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}
