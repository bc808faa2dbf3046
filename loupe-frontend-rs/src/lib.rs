#![deny(clippy::string_slice)]

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod feed;
pub mod interactions;
pub mod models;
pub mod queries;
pub mod session;
mod utils;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::LazyLock;

use wasm_bindgen::prelude::*;

use crate::backend::RestBackend;
use crate::error::RemoteError;
use crate::feed::{ExploreFeed, FeedMode};
use crate::interactions::{FlowState, FollowFlow, LikeFlow, SaveAction, SaveFlow};
use crate::models::{NewPost, NewUser, UpdatePost, UpdateUser, User};
use crate::queries::{LoupeCache, QueryKey, encode_cached};
use crate::session::Session;
use crate::utils::{remote_err, to_js};

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
#[allow(clippy::declare_interior_mutable_const)]
const LOGGER: LazyLock<()> = LazyLock::new(|| {
    utils::set_panic_hook();

    wasm_logger::init(wasm_logger::Config::default());
    log::info!("Logging initialized");
});

/// The app's data layer, as one object handed to the JS UI: the REST backend,
/// the shared query cache, the feed controller, and factories for the
/// optimistic interaction buttons.
#[wasm_bindgen]
pub struct Loupe {
    backend: Rc<RestBackend>,
    cache: Rc<LoupeCache>,
    session: RefCell<Option<Session>>,
    feed: Rc<RefCell<ExploreFeed<RestBackend>>>,
}

/// Flushes queued cache notifications when dropped, so no code path out of a
/// mutation can forget them. Callbacks run only once every borrow is gone.
struct FlushLater<'a> {
    cache: &'a LoupeCache,
}

impl<'a> FlushLater<'a> {
    fn new(cache: &'a LoupeCache) -> Self {
        Self { cache }
    }
}

impl Drop for FlushLater<'_> {
    fn drop(&mut self) {
        // collect first: the callbacks call straight back into code that
        // borrows the cache
        let notifications = self.cache.drain_due_notifications();
        for notification in notifications {
            notification();
        }
    }
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
impl Loupe {
    /// `session_secret` is a secret persisted by the UI from an earlier
    /// sign-in, if any.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen(constructor))]
    pub fn new(session_secret: Option<String>) -> Self {
        // used to only initialize the logger once
        #[allow(clippy::borrow_interior_mutable_const)]
        *LOGGER;

        let backend = Rc::new(RestBackend::new(config::backend_config()));
        backend.set_session_secret(session_secret);
        let cache = Rc::new(LoupeCache::new());
        let feed = Rc::new(RefCell::new(ExploreFeed::new(
            Rc::clone(&backend),
            Rc::clone(&cache),
        )));

        // Any mutation that invalidates the post list marks the feed; the
        // UI's own subscription decides when to run the refresh.
        {
            let feed = Rc::clone(&feed);
            let _ = cache.subscribe(QueryKey::Posts, move || {
                feed.borrow_mut().mark_needs_refresh();
            });
        }

        Self {
            backend,
            cache,
            session: RefCell::new(None),
            feed,
        }
    }

    // =======
    // account & session
    // =======

    pub async fn sign_up(&self, new_user: NewUser) -> Result<JsValue, JsValue> {
        let user = api::create_user_account(&*self.backend, &new_user)
            .await
            .map_err(|e| remote_err(&e))?;
        to_js(&user)
    }

    /// Returns the session secret for the UI to persist.
    pub async fn sign_in(&self, email: String, password: String) -> Result<String, JsValue> {
        let session = api::sign_in(&*self.backend, &email, &password)
            .await
            .map_err(|e| remote_err(&e))?;
        Ok(session.secret)
    }

    pub async fn sign_out(&self) -> Result<(), JsValue> {
        api::sign_out(&*self.backend)
            .await
            .map_err(|e| remote_err(&e))?;
        self.session.replace(None);
        self.cache.clear();
        Ok(())
    }

    pub fn session_secret(&self) -> Option<String> {
        self.backend.session_secret()
    }

    /// The signed-in user document, cached under the current-user key.
    pub async fn get_current_user(&self) -> Result<JsValue, JsValue> {
        let backend = Rc::clone(&self.backend);
        let value = self
            .cache
            .query(QueryKey::CurrentUser, async move {
                let user = api::get_current_user(&*backend).await?;
                encode_cached(user)
            })
            .await
            .map_err(|e| remote_err(&e))?;

        let user: User = serde_json::from_value(value.clone())
            .map_err(|e| JsValue::from_str(&format!("Response parsing error: {e:?}")))?;
        self.session.replace(Some(Session::for_user(user)));
        to_js(&value)
    }

    pub fn session(&self) -> Result<JsValue, JsValue> {
        to_js(&*self.session.borrow())
    }

    // =======
    // cached reads
    // =======

    pub async fn get_recent_posts(&self) -> Result<JsValue, JsValue> {
        let backend = Rc::clone(&self.backend);
        self.cached(QueryKey::RecentPosts, async move {
            encode_cached(api::get_recent_posts(&*backend).await?)
        })
        .await
    }

    pub async fn get_post_by_id(&self, post_id: String) -> Result<JsValue, JsValue> {
        let backend = Rc::clone(&self.backend);
        let key = QueryKey::PostById(post_id.clone());
        self.cached(key, async move {
            encode_cached(api::get_post_by_id(&*backend, &post_id).await?)
        })
        .await
    }

    pub async fn get_users(&self, limit: Option<usize>) -> Result<JsValue, JsValue> {
        let backend = Rc::clone(&self.backend);
        self.cached(QueryKey::Users { limit }, async move {
            encode_cached(api::get_users(&*backend, limit).await?)
        })
        .await
    }

    pub async fn get_user_by_id(&self, user_id: String) -> Result<JsValue, JsValue> {
        let backend = Rc::clone(&self.backend);
        let key = QueryKey::UserById(user_id.clone());
        self.cached(key, async move {
            encode_cached(api::get_user_by_id(&*backend, &user_id).await?)
        })
        .await
    }

    pub async fn get_user_posts(&self, user_id: String) -> Result<JsValue, JsValue> {
        let backend = Rc::clone(&self.backend);
        let key = QueryKey::UserPosts(user_id.clone());
        self.cached(key, async move {
            encode_cached(api::get_user_posts(&*backend, &user_id).await?)
        })
        .await
    }

    // =======
    // mutations (each invalidates per the table in `queries`)
    // =======

    pub async fn create_post(&self, new_post: NewPost) -> Result<JsValue, JsValue> {
        let _flusher = FlushLater::new(&self.cache);
        let backend = Rc::clone(&self.backend);
        let post = self
            .cache
            .mutate(
                async move { api::create_post(&*backend, &new_post).await },
                &queries::create_post_invalidates(),
            )
            .await
            .map_err(|e| remote_err(&e))?;
        to_js(&post)
    }

    pub async fn update_post(&self, update: UpdatePost) -> Result<JsValue, JsValue> {
        let _flusher = FlushLater::new(&self.cache);
        let backend = Rc::clone(&self.backend);
        let edges = queries::update_post_invalidates(&update.post_id);
        let post = self
            .cache
            .mutate(async move { api::update_post(&*backend, &update).await }, &edges)
            .await
            .map_err(|e| remote_err(&e))?;
        to_js(&post)
    }

    pub async fn delete_post(&self, post_id: String, image_id: String) -> Result<(), JsValue> {
        let _flusher = FlushLater::new(&self.cache);
        let backend = Rc::clone(&self.backend);
        self.cache
            .mutate(
                async move { api::delete_post(&*backend, &post_id, &image_id).await },
                &queries::delete_post_invalidates(),
            )
            .await
            .map_err(|e| remote_err(&e))
    }

    pub async fn update_user(&self, update: UpdateUser) -> Result<JsValue, JsValue> {
        let _flusher = FlushLater::new(&self.cache);
        let backend = Rc::clone(&self.backend);
        let edges = queries::update_user_invalidates(&update.user_id);
        let user = self
            .cache
            .mutate(async move { api::update_user(&*backend, &update).await }, &edges)
            .await
            .map_err(|e| remote_err(&e))?;
        to_js(&user)
    }

    /// Check the pair invariant between two users' follow arrays and repair a
    /// one-sided link. Returns whether a repair was written.
    pub async fn reconcile_follow_links(
        &self,
        follower_id: String,
        following_id: String,
    ) -> Result<bool, JsValue> {
        let _flusher = FlushLater::new(&self.cache);
        let repaired = api::reconcile_follow_links(&*self.backend, &follower_id, &following_id)
            .await
            .map_err(|e| remote_err(&e))?;
        if repaired {
            for key in queries::follow_user_invalidates(&following_id) {
                self.cache.invalidate(&key);
            }
        }
        Ok(repaired)
    }

    // =======
    // explore: debounced search + cursor pagination
    // =======

    pub fn set_search_input(&self, term: String, now_ms: f64) {
        self.feed.borrow_mut().set_search_input(term, now_ms);
    }

    /// Commit a quiet search term. Returns whether the committed term
    /// changed; the UI then runs the search (or, on an emptied term, resumes
    /// the feed).
    pub fn poll_search(&self, now_ms: f64) -> bool {
        self.feed.borrow_mut().poll_search(now_ms)
    }

    pub fn search_due_at(&self) -> Option<f64> {
        self.feed.borrow().search_due_at()
    }

    pub fn feed_mode(&self) -> FeedMode {
        self.feed.borrow().mode()
    }

    pub async fn run_search(&self) -> Result<(), JsValue> {
        ExploreFeed::run_search(&self.feed)
            .await
            .map_err(|e| remote_err(&e))
    }

    /// Results for the committed term, or null while none are cached.
    pub fn search_results(&self) -> Result<JsValue, JsValue> {
        to_js(&self.feed.borrow().search_results())
    }

    /// Called when the end-of-list sentinel becomes visible.
    pub async fn load_next_feed_page(&self) -> Result<bool, JsValue> {
        ExploreFeed::load_next_page(&self.feed)
            .await
            .map_err(|e| remote_err(&e))
    }

    pub async fn refresh_feed(&self) -> Result<(), JsValue> {
        ExploreFeed::refresh(&self.feed)
            .await
            .map_err(|e| remote_err(&e))
    }

    pub fn feed_pages(&self) -> Result<JsValue, JsValue> {
        to_js(&self.feed.borrow().pages())
    }

    pub fn feed_has_next_page(&self) -> bool {
        self.feed.borrow().has_next_page()
    }

    pub fn feed_needs_refresh(&self) -> bool {
        self.feed.borrow().needs_refresh()
    }

    // =======
    // subscriptions
    // =======

    /// Call `callback` whenever `key` is invalidated. Returns a handle for
    /// [`Self::unsubscribe`].
    pub fn subscribe(&self, key: QueryKey, callback: js_sys::Function) -> u64 {
        use pantry::Key as _;
        self.cache
            .subscribe(key, move || {
                let this = JsValue::null();
                let _ = callback.call0(&this);
            })
            .data()
            .as_ffi()
    }

    pub fn unsubscribe(&self, listener: u64) {
        self.cache
            .unsubscribe(pantry::ListenerKey::from(pantry::KeyData::from_ffi(listener)));
    }

    // =======
    // interaction buttons
    // =======

    /// `likes` is the post's current likes array; `viewer_id` the acting
    /// user, passed in explicitly from the session.
    pub fn like_button(&self, post_id: String, likes: Vec<String>, viewer_id: String) -> LikeButton {
        LikeButton {
            backend: Rc::clone(&self.backend),
            cache: Rc::clone(&self.cache),
            flow: RefCell::new(LikeFlow::new(post_id, viewer_id, likes)),
        }
    }

    /// `record_id` is the viewer's existing save record for this post, if
    /// any.
    pub fn save_button(
        &self,
        post_id: String,
        viewer_id: String,
        record_id: Option<String>,
    ) -> SaveButton {
        SaveButton {
            backend: Rc::clone(&self.backend),
            cache: Rc::clone(&self.cache),
            flow: RefCell::new(SaveFlow::new(post_id, viewer_id, record_id)),
        }
    }

    /// `follower_list` is the profile's followers, `following_list` the
    /// viewer's following list.
    pub fn follow_button(
        &self,
        viewer_id: String,
        profile_id: String,
        follower_list: Vec<String>,
        following_list: Vec<String>,
    ) -> FollowButton {
        FollowButton {
            backend: Rc::clone(&self.backend),
            cache: Rc::clone(&self.cache),
            flow: RefCell::new(FollowFlow::new(
                viewer_id,
                profile_id,
                follower_list,
                following_list,
            )),
        }
    }
}

impl Loupe {
    async fn cached<Fut>(&self, key: QueryKey, fetch: Fut) -> Result<JsValue, JsValue>
    where
        Fut: Future<Output = Result<serde_json::Value, RemoteError>> + 'static,
    {
        let value = self
            .cache
            .query(key, fetch)
            .await
            .map_err(|e| remote_err(&e))?;
        to_js(&value)
    }
}

// wasm-bindgen types can't be generic, so the buttons wrap their flows with
// the concrete REST backend; tests drive the flows and the gateway directly.

/// One post's like toggle. `click` renders the prediction synchronously (the
/// getters reflect it immediately) and resolves when the mutation settled or
/// rolled back.
#[wasm_bindgen]
pub struct LikeButton {
    backend: Rc<RestBackend>,
    cache: Rc<LoupeCache>,
    flow: RefCell<LikeFlow>,
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
impl LikeButton {
    pub fn likes(&self) -> Vec<String> {
        self.flow.borrow().likes().to_vec()
    }

    pub fn liked(&self) -> bool {
        self.flow.borrow().liked()
    }

    pub fn like_count(&self) -> usize {
        self.flow.borrow().likes().len()
    }

    pub fn state(&self) -> FlowState {
        self.flow.borrow().state()
    }

    pub async fn click(&self) -> Result<(), JsValue> {
        let _flusher = FlushLater::new(&self.cache);
        let (post_id, predicted) = {
            let mut flow = self.flow.borrow_mut();
            (flow.post_id().to_string(), flow.click())
        };

        let backend = Rc::clone(&self.backend);
        let edges = queries::like_post_invalidates(&post_id);
        let request_post_id = post_id.clone();
        let result = self
            .cache
            .mutate(
                async move { api::like_post(&*backend, &request_post_id, &predicted).await },
                &edges,
            )
            .await;

        match result {
            Ok(_post) => {
                self.flow.borrow_mut().settle();
                Ok(())
            }
            Err(error) => {
                self.flow.borrow_mut().roll_back();
                log::warn!("like toggle failed for {post_id}: {error}");
                Err(remote_err(&error))
            }
        }
    }
}

/// One post's save toggle: creates or deletes the viewer's save record.
#[wasm_bindgen]
pub struct SaveButton {
    backend: Rc<RestBackend>,
    cache: Rc<LoupeCache>,
    flow: RefCell<SaveFlow>,
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
impl SaveButton {
    pub fn saved(&self) -> bool {
        self.flow.borrow().saved()
    }

    pub fn state(&self) -> FlowState {
        self.flow.borrow().state()
    }

    pub async fn click(&self) -> Result<(), JsValue> {
        let _flusher = FlushLater::new(&self.cache);
        let (action, post_id, viewer_id) = {
            let mut flow = self.flow.borrow_mut();
            (
                flow.click(),
                flow.post_id().to_string(),
                flow.viewer_id().to_string(),
            )
        };
        // A click with a create still in flight has no record id to delete.
        let Some(action) = action else {
            return Ok(());
        };

        let backend = Rc::clone(&self.backend);
        let edges = queries::save_post_invalidates();
        let result = match action {
            SaveAction::Create => {
                self.cache
                    .mutate(
                        async move { api::save_post(&*backend, &viewer_id, &post_id).await.map(Some) },
                        &edges,
                    )
                    .await
            }
            SaveAction::Delete(record_id) => {
                self.cache
                    .mutate(
                        async move {
                            api::delete_saved_post(&*backend, &record_id).await?;
                            Ok(None)
                        },
                        &edges,
                    )
                    .await
            }
        };

        match result {
            Ok(Some(record)) => {
                self.flow.borrow_mut().settle_create(record.id);
                Ok(())
            }
            Ok(None) => {
                self.flow.borrow_mut().settle_delete();
                Ok(())
            }
            Err(error) => {
                self.flow.borrow_mut().roll_back();
                log::warn!("save toggle failed: {error}");
                Err(remote_err(&error))
            }
        }
    }
}

/// A profile's follow toggle: one logical mutation over both follow arrays.
#[wasm_bindgen]
pub struct FollowButton {
    backend: Rc<RestBackend>,
    cache: Rc<LoupeCache>,
    flow: RefCell<FollowFlow>,
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
impl FollowButton {
    pub fn follows(&self) -> bool {
        self.flow.borrow().follows()
    }

    pub fn follower_count(&self) -> usize {
        self.flow.borrow().follower_count()
    }

    pub fn state(&self) -> FlowState {
        self.flow.borrow().state()
    }

    pub async fn click(&self) -> Result<(), JsValue> {
        let _flusher = FlushLater::new(&self.cache);
        let (update, follower_id, following_id) = {
            let mut flow = self.flow.borrow_mut();
            (
                flow.click(),
                flow.follower_id().to_string(),
                flow.following_id().to_string(),
            )
        };

        let backend = Rc::clone(&self.backend);
        let edges = queries::follow_user_invalidates(&following_id);
        let request = (follower_id.clone(), following_id.clone());
        let result = self
            .cache
            .mutate(
                async move {
                    api::follow_user(
                        &*backend,
                        &request.0,
                        &request.1,
                        &update.follower_array,
                        &update.following_array,
                    )
                    .await
                },
                &edges,
            )
            .await;

        match result {
            Ok(()) => {
                self.flow.borrow_mut().settle();
                Ok(())
            }
            Err(error) => {
                self.flow.borrow_mut().roll_back();
                log::warn!("follow toggle failed for {following_id}: {error}");
                Err(remote_err(&error))
            }
        }
    }
}
