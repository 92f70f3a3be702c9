use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::auth::gate::AuthGate;
use crate::auth::models::SessionUser;
use crate::db::models::{now_millis, Bookmark, Document, Note, BOOKMARKS, NOTES};
use crate::db::repository::CatalogRepository;
use crate::db::store::{decode_all, Fields, RawRecord};
use crate::error::AppError;
use crate::mirror::cache::DocumentCache;

/// A record kept in a per-user sub-collection that points at a document.
pub trait MirrorRecord: DeserializeOwned + Clone + Send + Sync + 'static {
    /// Sub-collection name under `users/{uid}/`.
    const COLLECTION: &'static str;

    fn document_id(&self) -> &str;
}

impl MirrorRecord for Bookmark {
    const COLLECTION: &'static str = BOOKMARKS;

    fn document_id(&self) -> &str {
        &self.doc_id
    }
}

impl MirrorRecord for Note {
    const COLLECTION: &'static str = NOTES;

    fn document_id(&self) -> &str {
        &self.doc_id
    }
}

struct MirrorState<R> {
    user: Option<SessionUser>,
    entries: Vec<R>,
    /// Bumped on every start and stop. Snapshots and local writes tagged
    /// with an older epoch are dropped.
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

struct Inner<R> {
    repo: CatalogRepository,
    cache: DocumentCache,
    state: Mutex<MirrorState<R>>,
    changes: watch::Sender<u64>,
}

impl<R> Drop for Inner<R> {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }
}

/// Local mirror of one user's `bookmarks` or `notes` sub-collection.
///
/// While started, every snapshot pushed by the store replaces the local
/// entries, and documents they reference that are not yet cached are
/// fetched in batches. Clones share the same mirror.
pub struct LiveCollectionMirror<R: MirrorRecord> {
    inner: Arc<Inner<R>>,
    _record: PhantomData<fn() -> R>,
}

impl<R: MirrorRecord> Clone for LiveCollectionMirror<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _record: PhantomData,
        }
    }
}

pub type BookmarkMirror = LiveCollectionMirror<Bookmark>;
pub type NoteMirror = LiveCollectionMirror<Note>;

impl<R: MirrorRecord> LiveCollectionMirror<R> {
    pub fn new(repo: CatalogRepository, cache: DocumentCache) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                repo,
                cache,
                state: Mutex::new(MirrorState {
                    user: None,
                    entries: Vec::new(),
                    epoch: 0,
                    task: None,
                }),
                changes,
            }),
            _record: PhantomData,
        }
    }

    /// Subscribe to `user`'s sub-collection, replacing any previous
    /// subscription.
    pub async fn start(&self, user: SessionUser) -> Result<(), AppError> {
        let path = user.collection_path(R::COLLECTION);
        let mut subscription = self.inner.repo.store().subscribe(&path).await?;

        let mut state = self.lock();
        state.epoch += 1;
        let epoch = state.epoch;
        if let Some(previous) = state.task.take() {
            previous.abort();
        }
        state.user = Some(user);
        state.entries.clear();

        let weak = Arc::downgrade(&self.inner);
        let task_path = path.clone();
        state.task = Some(tokio::spawn(async move {
            while let Some(snapshot) = subscription.next().await {
                let Some(inner) = Weak::upgrade(&weak) else {
                    break;
                };
                if !apply_snapshot(&inner, epoch, snapshot).await {
                    break;
                }
            }
            tracing::debug!("Subscription to '{}' ended", task_path);
        }));

        tracing::info!("Mirroring '{}'", path);
        Ok(())
    }

    /// Unsubscribe and clear the local entries. Idempotent.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        let Some(task) = state.task.take() else {
            return;
        };
        task.abort();
        state.user = None;
        state.entries.clear();
        drop(state);

        self.bump();
        tracing::info!("Stopped mirroring {}", R::COLLECTION);
    }

    /// Start and stop with the session: start on sign-in, stop on
    /// sign-out. Runs until the auth provider goes away.
    pub fn follow_session(&self, gate: &AuthGate) -> JoinHandle<()> {
        let mirror = self.clone();
        let mut session = gate.subscribe();
        tokio::spawn(async move {
            loop {
                let user = session.borrow_and_update().clone();
                match user {
                    Some(user) => {
                        if mirror.user().map(|u| u.uid) != Some(user.uid.clone()) {
                            if let Err(e) = mirror.start(user).await {
                                tracing::warn!("Failed to subscribe to {}: {e}", R::COLLECTION);
                            }
                        }
                    }
                    None => mirror.stop(),
                }
                if session.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// The user whose collection is mirrored.
    pub fn user(&self) -> Option<SessionUser> {
        self.lock().user.clone()
    }

    pub fn entries(&self) -> Vec<R> {
        self.lock().entries.clone()
    }

    /// Revision counter, bumped after every applied snapshot or local write.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.inner.cache
    }

    /// The document an entry points at.
    pub fn resolve(&self, entry: &R) -> Result<Document, AppError> {
        self.inner
            .cache
            .get(entry.document_id())
            .ok_or_else(|| AppError::DanglingReference(entry.document_id().to_string()))
    }

    /// Entries paired with their documents. Entries whose document is
    /// gone are left out.
    pub fn resolved(&self) -> Vec<(R, Document)> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match self.resolve(&entry) {
                Ok(doc) => Some((entry, doc)),
                Err(e) => {
                    tracing::debug!("Skipping {} entry: {e}", R::COLLECTION);
                    None
                }
            })
            .collect()
    }

    fn require_user(&self, action: &str) -> Result<(SessionUser, u64), AppError> {
        let state = self.lock();
        match &state.user {
            Some(user) => Ok((user.clone(), state.epoch)),
            None => Err(AppError::AuthRequired(format!("You must sign in to {action}"))),
        }
    }

    /// Apply a write the store has accepted, unless the mirror was
    /// restarted or stopped in the meantime.
    fn apply_local(&self, epoch: u64, f: impl FnOnce(&mut Vec<R>)) {
        let mut state = self.lock();
        if state.epoch != epoch {
            return;
        }
        f(&mut state.entries);
        drop(state);
        self.bump();
    }

    fn bump(&self) {
        self.inner.changes.send_modify(|revision| *revision += 1);
    }

    fn lock(&self) -> MutexGuard<'_, MirrorState<R>> {
        lock_state(&self.inner)
    }
}

fn lock_state<R>(inner: &Inner<R>) -> MutexGuard<'_, MirrorState<R>> {
    match inner.state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Replace the entries with `snapshot` and fill the cache with the
/// documents they reference. Returns false once the mirror has moved on.
async fn apply_snapshot<R: MirrorRecord>(inner: &Inner<R>, epoch: u64, snapshot: Vec<RawRecord>) -> bool {
    let entries: Vec<R> = decode_all(&snapshot);
    let missing = inner
        .cache
        .missing(entries.iter().map(|entry| entry.document_id()));

    {
        let mut state = lock_state(inner);
        if state.epoch != epoch {
            return false;
        }
        state.entries = entries;
    }

    if !missing.is_empty() {
        match inner.repo.documents_by_ids(&missing).await {
            Ok(found) => {
                tracing::debug!(
                    requested = missing.len(),
                    found = found.len(),
                    "Resolved {} documents",
                    R::COLLECTION
                );
                inner.cache.extend(found.into_values());
            }
            Err(e) => tracing::warn!("Failed to resolve {} documents: {e}", R::COLLECTION),
        }
    }

    if lock_state(inner).epoch != epoch {
        return false;
    }
    inner.changes.send_modify(|revision| *revision += 1);
    true
}

impl LiveCollectionMirror<Bookmark> {
    pub fn is_bookmarked(&self, doc_id: &str) -> bool {
        self.lock().entries.iter().any(|b| b.doc_id == doc_id)
    }

    /// Add or remove the bookmark on `doc_id`. Returns whether the
    /// document is bookmarked afterwards.
    pub async fn toggle(&self, doc_id: &str) -> Result<bool, AppError> {
        let (user, epoch) = self.require_user("bookmark documents")?;
        let path = user.collection_path(BOOKMARKS);
        let store = self.inner.repo.store();

        if self.is_bookmarked(doc_id) {
            store.delete(&path, doc_id).await?;
            self.apply_local(epoch, |entries| entries.retain(|b| b.doc_id != doc_id));
            tracing::info!(uid = %user.uid, "Removed bookmark on {}", doc_id);
            Ok(false)
        } else {
            let added_at = now_millis();
            let mut fields = Fields::new();
            fields.insert("docId".into(), json!(doc_id));
            fields.insert("addedAt".into(), json!(added_at.timestamp_millis()));
            store.upsert_merge(&path, doc_id, fields).await?;

            let bookmark = Bookmark {
                id: doc_id.to_string(),
                doc_id: doc_id.to_string(),
                added_at,
            };
            self.apply_local(epoch, |entries| {
                if !entries.iter().any(|b| b.doc_id == bookmark.doc_id) {
                    entries.push(bookmark);
                }
            });
            tracing::info!(uid = %user.uid, "Bookmarked {}", doc_id);
            Ok(true)
        }
    }
}

impl LiveCollectionMirror<Note> {
    pub fn note_for(&self, doc_id: &str) -> Option<Note> {
        self.lock().entries.iter().find(|n| n.doc_id == doc_id).cloned()
    }

    /// Write the note on `doc_id`. Last write wins.
    pub async fn save(&self, doc_id: &str, content: &str) -> Result<Note, AppError> {
        let (user, epoch) = self.require_user("save notes")?;
        let path = user.collection_path(NOTES);

        let updated_at = now_millis();
        let mut fields = Fields::new();
        fields.insert("docId".into(), json!(doc_id));
        fields.insert("content".into(), json!(content));
        fields.insert("updatedAt".into(), json!(updated_at.timestamp_millis()));
        self.inner.repo.store().upsert_merge(&path, doc_id, fields).await?;

        let note = Note {
            id: doc_id.to_string(),
            doc_id: doc_id.to_string(),
            content: content.to_string(),
            updated_at,
        };
        let local = note.clone();
        self.apply_local(epoch, move |entries| {
            match entries.iter_mut().find(|n| n.doc_id == local.doc_id) {
                Some(existing) => *existing = local,
                None => entries.push(local),
            }
        });
        tracing::info!(uid = %user.uid, "Saved note on {}", doc_id);
        Ok(note)
    }
}
