use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::watch;

use crate::config::CatalogConfig;
use crate::db::models::{Document, Major, Tag};
use crate::db::repository::CatalogRepository;
use crate::db::store::{Cursor, Query};
use crate::error::AppError;
use crate::mirror::cache::DocumentCache;
use crate::search::debounce::Debouncer;
use crate::search::query::{build_query, filter_by_term, FilterChange, SearchFilters};

const FETCH_FAILED: &str = "Failed to fetch documents.";
const FILTER_OPTIONS_FAILED: &str = "Failed to load filter options.";

/// Everything the search screen renders. Handed out as a copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchView {
    /// The term of the last dispatched search.
    pub term: String,
    pub filters: SearchFilters,
    /// Matching documents across all loaded pages, in store order.
    pub documents: Vec<Document>,
    pub majors: Vec<Major>,
    pub tags: Vec<Tag>,
    /// Whether the last store page was full. The term filter runs after
    /// the store query, so this can be true when nothing else matches.
    pub has_more: bool,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for SearchView {
    fn default() -> Self {
        Self {
            term: String::new(),
            filters: SearchFilters::default(),
            documents: Vec::new(),
            majors: Vec::new(),
            tags: Vec::new(),
            has_more: true,
            loading: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fetch {
    Replace,
    Append,
}

struct SearchState {
    view: SearchView,
    cursor: Option<Cursor>,
}

/// A query that has been admitted and stamped with its generation.
struct Ticket {
    generation: u64,
    mode: Fetch,
    query: Query,
    term: String,
}

struct Inner {
    repo: CatalogRepository,
    cache: DocumentCache,
    page_size: usize,
    state: Mutex<SearchState>,
    /// Bumped for every dispatched query; responses carrying an older
    /// generation are dropped.
    generation: AtomicU64,
    debouncer: Debouncer,
    updates: watch::Sender<SearchView>,
}

/// Catalog search with debounced term input and cursor pagination.
///
/// Cheap to clone; clones drive the same search.
#[derive(Clone)]
pub struct CatalogSearch {
    inner: Arc<Inner>,
}

impl CatalogSearch {
    pub fn new(repo: CatalogRepository, cache: DocumentCache, config: &CatalogConfig) -> Self {
        let view = SearchView::default();
        let (updates, _) = watch::channel(view.clone());
        Self {
            inner: Arc::new(Inner {
                repo,
                cache,
                page_size: config.page_size.max(1),
                state: Mutex::new(SearchState { view, cursor: None }),
                generation: AtomicU64::new(0),
                debouncer: Debouncer::new(config.debounce()),
                updates,
            }),
        }
    }

    /// A copy of the current state.
    pub fn view(&self) -> SearchView {
        self.lock().view.clone()
    }

    /// Receiver notified on every state transition.
    pub fn watch(&self) -> watch::Receiver<SearchView> {
        self.inner.updates.subscribe()
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.inner.cache
    }

    /// Fetch the majors and tags offered as filters.
    pub async fn load_filter_options(&self) -> Result<(), AppError> {
        let loaded = async {
            let majors = self.inner.repo.majors().await?;
            let tags = self.inner.repo.tags().await?;
            Ok::<_, AppError>((majors, tags))
        }
        .await;

        let mut state = self.lock();
        match loaded {
            Ok((majors, tags)) => {
                state.view.majors = majors;
                state.view.tags = tags;
                self.publish(&state);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to fetch majors or tags: {e}");
                state.view.error = Some(FILTER_OPTIONS_FAILED.to_string());
                self.publish(&state);
                Err(e)
            }
        }
    }

    /// Debounced term input. Only the last term of a burst is searched,
    /// replacing the result list.
    pub fn set_term(&self, term: impl Into<String>) {
        let term = term.into();
        let this = self.clone();
        self.inner.debouncer.call(async move {
            if let Err(e) = this.search_term(term).await {
                tracing::warn!("Search failed: {e}");
            }
        });
    }

    /// Search `term` immediately, dropping any pending debounced input.
    pub async fn submit(&self, term: impl Into<String>) -> Result<(), AppError> {
        self.inner.debouncer.cancel();
        self.search_term(term.into()).await
    }

    /// Change one filter. Re-runs the search only when a term is active.
    pub async fn set_filter(&self, change: FilterChange) -> Result<(), AppError> {
        let rerun = {
            let mut state = self.lock();
            state.view.filters.apply(change);
            self.publish(&state);
            !state.view.term.trim().is_empty()
        };

        if rerun {
            self.execute(Fetch::Replace).await
        } else {
            Ok(())
        }
    }

    /// Append the next page. A no-op while loading or when the last
    /// page was short.
    pub async fn load_more(&self) -> Result<(), AppError> {
        self.execute(Fetch::Append).await
    }

    async fn search_term(&self, term: String) -> Result<(), AppError> {
        {
            let mut state = self.lock();
            state.view.term = term;
        }
        self.execute(Fetch::Replace).await
    }

    async fn execute(&self, mode: Fetch) -> Result<(), AppError> {
        let Some(ticket) = self.admit(mode) else {
            return Ok(());
        };

        let in_flight = InFlight {
            search: self,
            generation: ticket.generation,
            armed: true,
        };
        let result = self.inner.repo.query_documents(&ticket.query).await;
        in_flight.disarm();

        let mut state = self.lock();
        if self.inner.generation.load(Ordering::SeqCst) != ticket.generation {
            tracing::debug!(
                generation = ticket.generation,
                "Discarding response to a superseded search"
            );
            return Ok(());
        }

        state.view.loading = false;
        let (page, documents) = match result {
            Ok(found) => found,
            Err(e) => {
                state.view.error = Some(FETCH_FAILED.to_string());
                self.publish(&state);
                return Err(e);
            }
        };

        let fetched = page.records.len();
        self.inner.cache.extend(documents.iter().cloned());
        let matching = filter_by_term(documents, &ticket.term);

        match ticket.mode {
            Fetch::Replace => state.view.documents = matching,
            Fetch::Append => state.view.documents.extend(matching),
        }
        state.cursor = page.next_cursor;
        state.view.has_more = fetched == self.inner.page_size;

        tracing::debug!(
            term = %ticket.term,
            fetched,
            shown = state.view.documents.len(),
            has_more = state.view.has_more,
            "Search page applied"
        );
        self.publish(&state);
        Ok(())
    }

    /// Stamp and register a query, or refuse an append that is not allowed.
    fn admit(&self, mode: Fetch) -> Option<Ticket> {
        let mut state = self.lock();

        if mode == Fetch::Append && (!state.view.has_more || state.view.loading) {
            tracing::debug!(
                has_more = state.view.has_more,
                loading = state.view.loading,
                "Ignoring load-more"
            );
            return None;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cursor = match mode {
            Fetch::Replace => None,
            Fetch::Append => state.cursor.clone(),
        };
        let query = build_query(&state.view.filters, self.inner.page_size, cursor);

        state.view.loading = true;
        state.view.error = None;
        self.publish(&state);

        Some(Ticket {
            generation,
            mode,
            query,
            term: state.view.term.clone(),
        })
    }

    /// Clear `loading` for an abandoned query that is still the latest.
    fn abandon(&self, generation: u64) {
        let mut state = self.lock();
        if self.inner.generation.load(Ordering::SeqCst) == generation && state.view.loading {
            tracing::debug!(generation, "Search dropped before its response arrived");
            state.view.loading = false;
            self.publish(&state);
        }
    }

    fn publish(&self, state: &SearchState) {
        self.inner.updates.send_replace(state.view.clone());
    }

    fn lock(&self) -> MutexGuard<'_, SearchState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Held across the store call of an admitted query. Dropping it while
/// armed means the caller dropped the query future.
struct InFlight<'a> {
    search: &'a CatalogSearch,
    generation: u64,
    armed: bool,
}

impl InFlight<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.search.abandon(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryStore;
    use crate::db::models::DOCUMENTS;
    use crate::db::store::Fields;
    use serde_json::json;

    fn seeded_search(count: usize, page_size: usize) -> CatalogSearch {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..count {
            let fields: Fields = serde_json::from_value(json!({
                "title": format!("Giáo trình {i}"),
                "major": "m1",
                "description": if i % 2 == 0 { "toán rời rạc" } else { "vật lý" },
                "tags": [],
                "documentLink": "https://example.edu",
                "createdAt": 1_000 + i as i64,
            }))
            .unwrap();
            store
                .insert_with_id(DOCUMENTS, &format!("d{:02}", i), fields)
                .unwrap();
        }
        let config = CatalogConfig {
            page_size,
            ..CatalogConfig::default()
        };
        CatalogSearch::new(CatalogRepository::new(store), DocumentCache::new(), &config)
    }

    #[tokio::test]
    async fn test_initial_view() {
        let search = seeded_search(0, 10);
        let view = search.view();
        assert!(view.documents.is_empty());
        assert!(view.has_more);
        assert!(!view.loading);
    }

    #[tokio::test]
    async fn test_submit_filters_locally_and_caches_page() {
        let search = seeded_search(4, 10);
        search.submit("TOÁN").await.unwrap();

        let view = search.view();
        let ids: Vec<&str> = view.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d02", "d00"]);
        assert!(!view.has_more);
        assert_eq!(search.cache().len(), 4);
    }

    #[tokio::test]
    async fn test_filter_change_without_term_does_not_query() {
        let search = seeded_search(4, 10);
        search
            .set_filter(FilterChange::Major(Some("m1".into())))
            .await
            .unwrap();

        let view = search.view();
        assert!(view.documents.is_empty());
        assert_eq!(view.filters.major.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_load_more_appends_until_short_page() {
        let search = seeded_search(5, 2);
        search.submit("").await.unwrap();
        assert_eq!(search.view().documents.len(), 2);
        assert!(search.view().has_more);

        search.load_more().await.unwrap();
        search.load_more().await.unwrap();
        let view = search.view();
        let ids: Vec<&str> = view.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d04", "d03", "d02", "d01", "d00"]);
        assert!(!view.has_more);

        search.load_more().await.unwrap();
        assert_eq!(search.view().documents.len(), 5);
    }

    #[tokio::test]
    async fn test_blank_term_is_not_an_active_search() {
        let search = seeded_search(4, 10);
        search.submit("   ").await.unwrap();
        assert_eq!(search.view().documents.len(), 4);

        search
            .set_filter(FilterChange::Major(Some("m-other".into())))
            .await
            .unwrap();
        assert_eq!(search.view().documents.len(), 4);
        assert_eq!(search.view().filters.major.as_deref(), Some("m-other"));
    }

    #[tokio::test]
    async fn test_watch_sees_final_state() {
        let search = seeded_search(3, 10);
        let rx = search.watch();
        search.submit("").await.unwrap();
        assert_eq!(rx.borrow().documents.len(), 3);
        assert!(!rx.borrow().loading);
    }
}
