//! Feed pagination and debounced search.
//!
//! Two mutually exclusive view modes, selected by whether the debounced
//! search term is non-empty: the cursor-paginated feed, or a single-shot
//! search on the committed term. Pagination is suspended entirely while a
//! term is active and resumes from the last fetched cursor when it clears.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::api;
use crate::backend::Backend;
use crate::error::RemoteError;
use crate::models::{DocumentPage, Post};
use crate::queries::{LoupeCache, QueryKey, encode_cached};

/// Quiet period before a typed search term takes effect.
pub const SEARCH_DEBOUNCE_MS: f64 = 300.0;
/// Posts per feed page.
pub const FEED_PAGE_SIZE: usize = 9;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub enum FeedMode {
    Feed,
    Search,
}

/// A search term that commits only after [`SEARCH_DEBOUNCE_MS`] without
/// further input. Clock readings are passed in (milliseconds, as the UI's
/// clock reports them) so the logic stays deterministic.
#[derive(Clone, Debug, Default)]
pub struct DebouncedTerm {
    input: String,
    committed: String,
    last_input_at: Option<f64>,
}

impl DebouncedTerm {
    pub fn set_input(&mut self, term: String, now_ms: f64) {
        if term == self.input {
            return;
        }
        self.input = term;
        self.last_input_at = Some(now_ms);
    }

    /// When the pending input will commit, for scheduling a wake-up.
    pub fn due_at(&self) -> Option<f64> {
        self.last_input_at.map(|at| at + SEARCH_DEBOUNCE_MS)
    }

    /// Commit the pending input once it has been quiet long enough. Returns
    /// whether the committed term changed.
    pub fn poll(&mut self, now_ms: f64) -> bool {
        let Some(at) = self.last_input_at else {
            return false;
        };
        if now_ms - at < SEARCH_DEBOUNCE_MS {
            return false;
        }
        self.last_input_at = None;
        if self.input == self.committed {
            return false;
        }
        self.committed = self.input.clone();
        true
    }

    pub fn committed(&self) -> &str {
        &self.committed
    }
}

/// One fetched page of the feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub documents: Vec<Post>,
}

/// The explore screen's controller: an ordered page sequence fetched by
/// last-seen-id cursor, plus the debounced search that suspends it.
pub struct ExploreFeed<B> {
    backend: Rc<B>,
    cache: Rc<LoupeCache>,
    pages: im::Vector<FeedPage>,
    next_cursor: Option<String>,
    exhausted: bool,
    loading: bool,
    needs_refresh: bool,
    search: DebouncedTerm,
}

impl<B: Backend + 'static> ExploreFeed<B> {
    pub fn new(backend: Rc<B>, cache: Rc<LoupeCache>) -> Self {
        Self {
            backend,
            cache,
            pages: im::Vector::new(),
            next_cursor: None,
            exhausted: false,
            loading: false,
            needs_refresh: false,
            search: DebouncedTerm::default(),
        }
    }

    pub fn mode(&self) -> FeedMode {
        if self.search.committed().is_empty() {
            FeedMode::Feed
        } else {
            FeedMode::Search
        }
    }

    pub fn pages(&self) -> im::Vector<FeedPage> {
        self.pages.clone()
    }

    /// Whether a sentinel-visible signal should trigger another fetch.
    pub fn has_next_page(&self) -> bool {
        !self.exhausted
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn next_cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref()
    }

    pub fn committed_term(&self) -> &str {
        self.search.committed()
    }

    pub fn set_search_input(&mut self, term: String, now_ms: f64) {
        self.search.set_input(term, now_ms);
    }

    pub fn search_due_at(&self) -> Option<f64> {
        self.search.due_at()
    }

    pub fn poll_search(&mut self, now_ms: f64) -> bool {
        self.search.poll(now_ms)
    }

    /// Called when the post list is invalidated. The actual refetch runs when
    /// the owner next calls [`Self::refresh`].
    pub fn mark_needs_refresh(&mut self) {
        self.needs_refresh = true;
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    /// Search results for the currently committed term. Results of superseded
    /// terms live under their own cache keys and are never shown.
    pub fn search_results(&self) -> Option<DocumentPage<Post>> {
        if self.search.committed().is_empty() {
            return None;
        }
        let value = self
            .cache
            .peek(&QueryKey::SearchPosts(self.search.committed().to_string()))?;
        serde_json::from_value(value).ok()
    }

    fn push_page(&mut self, page: DocumentPage<Post>) {
        match page.documents.last().map(|post| post.id.clone()) {
            Some(last_id) => {
                self.next_cursor = Some(last_id);
                self.pages.push_back(FeedPage {
                    documents: page.documents,
                });
            }
            None => {
                // An empty page is the end of the feed: no next cursor.
                self.next_cursor = None;
                self.exhausted = true;
            }
        }
    }

    fn reset_pages(&mut self) {
        self.pages = im::Vector::new();
        self.next_cursor = None;
        self.exhausted = false;
    }

    /// Fetch the next feed page. Returns false without fetching while a
    /// search term is active, while a fetch is already running, or once the
    /// feed is exhausted.
    pub async fn load_next_page(feed: &RefCell<Self>) -> Result<bool, RemoteError> {
        let (backend, cursor) = {
            let mut this = feed.borrow_mut();
            if this.mode() == FeedMode::Search || this.exhausted || this.loading {
                return Ok(false);
            }
            this.loading = true;
            (Rc::clone(&this.backend), this.next_cursor.clone())
        };

        // No borrow across the await.
        let result = api::get_posts_page(&*backend, cursor.as_deref(), FEED_PAGE_SIZE).await;

        let mut this = feed.borrow_mut();
        this.loading = false;
        let page = result?;
        this.push_page(page);
        Ok(true)
    }

    /// Run the search for the committed term through the cache. A superseded
    /// query may still resolve afterwards, but [`Self::search_results`] reads
    /// by the exact committed term so its result is never displayed.
    pub async fn run_search(feed: &RefCell<Self>) -> Result<(), RemoteError> {
        let (backend, cache, term) = {
            let this = feed.borrow();
            if this.search.committed().is_empty() {
                return Ok(());
            }
            (
                Rc::clone(&this.backend),
                Rc::clone(&this.cache),
                this.search.committed().to_string(),
            )
        };

        let fetch_term = term.clone();
        cache
            .query(QueryKey::SearchPosts(term), async move {
                let page = api::search_posts(&*backend, &fetch_term).await?;
                encode_cached(page)
            })
            .await?;
        Ok(())
    }

    /// Refetch every loaded page front-to-back, re-chaining cursors from the
    /// top. Deferred while a search is active; the feed resumes (and then
    /// refreshes) when the term clears.
    pub async fn refresh(feed: &RefCell<Self>) -> Result<(), RemoteError> {
        let (backend, page_count) = {
            let mut this = feed.borrow_mut();
            if this.mode() == FeedMode::Search {
                this.needs_refresh = true;
                return Ok(());
            }
            if this.loading {
                return Ok(());
            }
            this.loading = true;
            this.needs_refresh = false;
            (Rc::clone(&this.backend), this.pages.len().max(1))
        };

        let mut refreshed: Vec<DocumentPage<Post>> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut failure = None;
        for _ in 0..page_count {
            match api::get_posts_page(&*backend, cursor.as_deref(), FEED_PAGE_SIZE).await {
                Ok(page) => {
                    cursor = page.documents.last().map(|post| post.id.clone());
                    let end = cursor.is_none();
                    refreshed.push(page);
                    if end {
                        break;
                    }
                }
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        let mut this = feed.borrow_mut();
        this.loading = false;
        if let Some(error) = failure {
            // Keep the pages we had; the refresh stays due.
            this.needs_refresh = true;
            return Err(error);
        }
        this.reset_pages();
        for page in refreshed {
            this.push_page(page);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debounce_waits_for_quiet_period() {
        let mut term = DebouncedTerm::default();
        term.set_input("sun".to_string(), 1000.0);

        assert!(!term.poll(1299.0));
        assert_eq!(term.committed(), "");

        assert!(term.poll(1300.0));
        assert_eq!(term.committed(), "sun");
    }

    #[test]
    fn test_debounce_resets_on_further_input() {
        let mut term = DebouncedTerm::default();
        term.set_input("s".to_string(), 0.0);
        term.set_input("su".to_string(), 200.0);

        // 350ms is past the first keystroke but not the second.
        assert!(!term.poll(350.0));
        assert!(term.poll(500.0));
        assert_eq!(term.committed(), "su");
    }

    #[test]
    fn test_debounce_commit_is_edge_triggered() {
        let mut term = DebouncedTerm::default();
        term.set_input("sun".to_string(), 0.0);
        assert!(term.poll(300.0));
        // Nothing pending: polling again reports no change.
        assert!(!term.poll(900.0));

        // Retyping the identical term is not a change.
        term.set_input("sun".to_string(), 1000.0);
        assert!(!term.poll(2000.0));
    }

    #[test]
    fn test_clearing_the_term_commits_empty() {
        let mut term = DebouncedTerm::default();
        term.set_input("sun".to_string(), 0.0);
        assert!(term.poll(300.0));

        term.set_input(String::new(), 400.0);
        assert!(!term.poll(500.0));
        assert!(term.poll(700.0));
        assert_eq!(term.committed(), "");
    }
}
