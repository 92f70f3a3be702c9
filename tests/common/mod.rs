#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;

use ebook_hub::auth::gate::AuthGate;
use ebook_hub::auth::models::SessionUser;
use ebook_hub::auth::provider::{AuthProvider, MemoryAuthProvider};
use ebook_hub::config::CatalogConfig;
use ebook_hub::db::memory::InMemoryStore;
use ebook_hub::db::models::DOCUMENTS;
use ebook_hub::db::repository::CatalogRepository;
use ebook_hub::db::store::{DocumentStore, Fields, Query, QueryPage, RawRecord, Subscription};
use ebook_hub::error::AppError;
use ebook_hub::mirror::cache::DocumentCache;
use ebook_hub::search::catalog::CatalogSearch;

/// Wraps the in-memory store, counting reads and optionally delaying or
/// failing `list` calls.
pub struct InstrumentedStore {
    inner: Arc<InMemoryStore>,
    pub list_calls: AtomicUsize,
    pub get_by_ids_calls: AtomicUsize,
    list_delays: Mutex<VecDeque<Duration>>,
    fail_lists: AtomicBool,
}

impl InstrumentedStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            list_calls: AtomicUsize::new(0),
            get_by_ids_calls: AtomicUsize::new(0),
            list_delays: Mutex::new(VecDeque::new()),
            fail_lists: AtomicBool::new(false),
        }
    }

    /// Delay the next `list` calls by the given durations, in order.
    pub fn script_list_delays(&self, delays: impl IntoIterator<Item = Duration>) {
        self.list_delays.lock().unwrap().extend(delays);
    }

    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_by_ids_calls(&self) -> usize {
        self.get_by_ids_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for InstrumentedStore {
    fn max_batch_width(&self) -> usize {
        self.inner.max_batch_width()
    }

    async fn list(&self, collection: &str, query: &Query) -> Result<QueryPage, AppError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.list_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(AppError::Network("store unavailable".into()));
        }
        self.inner.list(collection, query).await
    }

    async fn get_by_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<RawRecord>, AppError> {
        self.get_by_ids_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_by_ids(collection, ids).await
    }

    async fn subscribe(&self, collection: &str) -> Result<Subscription, AppError> {
        self.inner.subscribe(collection).await
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<String, AppError> {
        self.inner.create(collection, fields).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), AppError> {
        self.inner.update(collection, id, fields).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), AppError> {
        self.inner.delete(collection, id).await
    }

    async fn upsert_merge(&self, collection: &str, id: &str, fields: Fields) -> Result<(), AppError> {
        self.inner.upsert_merge(collection, id, fields).await
    }
}

/// An in-process catalog: store, repository, auth and a shared cache.
pub struct TestEnv {
    pub memory: Arc<InMemoryStore>,
    pub store: Arc<InstrumentedStore>,
    pub repo: CatalogRepository,
    pub auth: Arc<MemoryAuthProvider>,
    pub gate: AuthGate,
    pub cache: DocumentCache,
}

impl TestEnv {
    pub fn start() -> Self {
        Self::with_batch_width(10)
    }

    pub fn with_batch_width(batch_width: usize) -> Self {
        let memory = Arc::new(InMemoryStore::with_batch_width(batch_width));
        let store = Arc::new(InstrumentedStore::new(memory.clone()));
        let repo = CatalogRepository::new(store.clone());
        let auth = Arc::new(MemoryAuthProvider::new());
        let gate = AuthGate::new(auth.clone());
        Self {
            memory,
            store,
            repo,
            auth,
            gate,
            cache: DocumentCache::new(),
        }
    }

    pub fn search(&self, page_size: usize) -> CatalogSearch {
        let config = CatalogConfig {
            page_size,
            ..CatalogConfig::default()
        };
        CatalogSearch::new(self.repo.clone(), self.cache.clone(), &config)
    }

    /// Insert a document directly into the store.
    pub fn insert_document(&self, id: &str, title: &str, description: &str, created_at: i64) {
        let fields: Fields = serde_json::from_value(json!({
            "title": title,
            "major": "m-general",
            "description": description,
            "tags": [],
            "documentLink": format!("https://ebookhub.example.edu/docs/{id}.pdf"),
            "createdAt": created_at,
        }))
        .unwrap();
        self.memory.insert_with_id(DOCUMENTS, id, fields).unwrap();
    }

    /// Insert `count` documents `d00`, `d01`, ... with ascending creation times.
    pub fn insert_documents(&self, count: usize, title: &str, description: &str) {
        for i in 0..count {
            self.insert_document(
                &format!("d{i:02}"),
                &format!("{title} {i}"),
                description,
                1_700_000_000_000 + i as i64,
            );
        }
    }

    pub async fn sign_up(&self, email: &str) -> SessionUser {
        self.auth.sign_up(email, "matkhau123").await.unwrap()
    }
}

/// Wait until `done` holds, re-checking on every revision.
pub async fn wait_until(rx: &mut watch::Receiver<u64>, mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("condition not reached in time");
}
