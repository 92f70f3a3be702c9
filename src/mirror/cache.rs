use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::db::models::Document;

/// Shared, single-owner cache of catalog documents keyed by id.
///
/// Cloning the cache clones the handle, not the contents. Reads return
/// copies so no caller ever holds the lock.
#[derive(Clone, Default)]
pub struct DocumentCache {
    documents: Arc<RwLock<HashMap<String, Document>>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.read(|docs| docs.get(id).cloned())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read(|docs| docs.contains_key(id))
    }

    pub fn len(&self) -> usize {
        self.read(HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct ids from `ids` that are not cached, in first-seen order.
    pub fn missing<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        self.read(|docs| {
            let mut missing: Vec<String> = Vec::new();
            for id in ids {
                if !docs.contains_key(id) && !missing.iter().any(|m| m == id) {
                    missing.push(id.to_string());
                }
            }
            missing
        })
    }

    pub fn insert(&self, doc: Document) {
        self.extend(std::iter::once(doc));
    }

    pub fn extend(&self, docs: impl IntoIterator<Item = Document>) {
        let mut guard = match self.documents.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for doc in docs {
            guard.insert(doc.id.clone(), doc);
        }
    }

    pub fn remove(&self, id: &str) -> Option<Document> {
        let mut guard = match self.documents.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.remove(id)
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<String, Document>) -> T) -> T {
        match self.documents.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(id: &str) -> Document {
        Document {
            id: id.to_string(),
            title: format!("Doc {id}"),
            major: "m".to_string(),
            description: String::new(),
            tags: vec![],
            document_link: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_clones_share_contents() {
        let cache = DocumentCache::new();
        let other = cache.clone();
        cache.insert(doc("a"));
        assert!(other.contains("a"));
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_reads_are_copies() {
        let cache = DocumentCache::new();
        cache.insert(doc("a"));
        let mut copy = cache.get("a").unwrap();
        copy.title = "changed".to_string();
        assert_eq!(cache.get("a").unwrap().title, "Doc a");
    }

    #[test]
    fn test_missing_is_distinct_and_ordered() {
        let cache = DocumentCache::new();
        cache.insert(doc("b"));
        let missing = cache.missing(["c", "b", "a", "c"]);
        assert_eq!(missing, vec!["c".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_remove() {
        let cache = DocumentCache::new();
        cache.insert(doc("a"));
        assert!(cache.remove("a").is_some());
        assert!(cache.is_empty());
    }
}
