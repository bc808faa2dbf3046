//! A client-side query cache with invalidate-on-write semantics.
//!
//! The cache sits between UI-facing controllers and the functions that talk to a
//! remote backend. Reads go through [`QueryCache::query`]: a fresh cached value is
//! returned as-is, anything else triggers the supplied fetch, and concurrent reads
//! of the same key share a single in-flight request. Writes go through
//! [`QueryCache::mutate`], which on success marks a declared set of keys stale so
//! the next read of each refetches.
//!
//! Consumers that want to know when "their" key went stale register a callback
//! with [`QueryCache::subscribe`]. Notifications are queued, not delivered
//! immediately: the owner drains them with [`QueryCache::drain_due_notifications`]
//! once it holds no borrows, because callbacks will usually call straight back
//! into code that borrows the cache.
//!
//! Everything here is single-threaded. Futures don't need to be `Send`, and the
//! one internal invariant is that no `RefCell` borrow is ever held across an
//! `.await`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

use futures::FutureExt as _;
use futures::future::{LocalBoxFuture, Shared};
use slotmap::SlotMap;

// So callers can flatten a ListenerKey to an integer at an FFI boundary.
pub use slotmap::{Key, KeyData};

slotmap::new_key_type! {
    /// Handle returned by [`QueryCache::subscribe`]; pass it to
    /// [`QueryCache::unsubscribe`] to stop receiving notifications.
    pub struct ListenerKey;
}

type SharedFetch<V, E> = Shared<LocalBoxFuture<'static, Result<V, E>>>;

enum Entry<V, E> {
    /// A value the next read may return directly.
    Fresh(V),
    /// A value that is still peekable but must be refetched on the next read.
    Stale(V),
    /// A fetch in flight. Later reads of the same key await the same future.
    Computing {
        generation: u64,
        future: SharedFetch<V, E>,
    },
}

/// Owned outcome of a cache lookup, so the entry-map borrow is released
/// before any insertion happens.
enum Lookup<V, E> {
    Fresh(V),
    InFlight(SharedFetch<V, E>),
    Missed,
}

struct Listener<K> {
    key: K,
    callback: Rc<dyn Fn()>,
}

pub struct QueryCache<K, V, E> {
    entries: Rc<RefCell<HashMap<K, Entry<V, E>>>>,
    listeners: RefCell<SlotMap<ListenerKey, Listener<K>>>,
    due: RefCell<Vec<ListenerKey>>,
    generation: Cell<u64>,
}

impl<K, V, E> Default for QueryCache<K, V, E> {
    fn default() -> Self {
        Self {
            entries: Rc::new(RefCell::new(HashMap::new())),
            listeners: RefCell::new(SlotMap::with_key()),
            due: RefCell::new(Vec::new()),
            generation: Cell::new(0),
        }
    }
}

impl<K, V, E> QueryCache<K, V, E>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
    E: Clone + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key` if it is fresh, otherwise run `fetch`
    /// once, store the result, and return it.
    ///
    /// Concurrent calls for the same key are deduplicated: they all await one
    /// shared future (which is why `V` and `E` must be `Clone`). A failed fetch
    /// stores nothing, so the next read retries.
    pub async fn query<Fut>(&self, key: K, fetch: Fut) -> Result<V, E>
    where
        Fut: Future<Output = Result<V, E>> + 'static,
    {
        let future = {
            let mut entries = self.entries.borrow_mut();
            let looked_up = match entries.get(&key) {
                Some(Entry::Fresh(value)) => Lookup::Fresh(value.clone()),
                Some(Entry::Computing { future, .. }) => Lookup::InFlight(future.clone()),
                Some(Entry::Stale(_)) | None => Lookup::Missed,
            };
            match looked_up {
                Lookup::Fresh(value) => return Ok(value),
                Lookup::InFlight(future) => future,
                Lookup::Missed => {
                    let generation = self.next_generation();
                    let entries_rc = Rc::clone(&self.entries);
                    let completion_key = key.clone();
                    let future = async move {
                        let result = fetch.await;
                        let mut entries = entries_rc.borrow_mut();
                        let ours = matches!(
                            entries.get(&completion_key),
                            Some(Entry::Computing { generation: current, .. })
                                if *current == generation
                        );
                        match &result {
                            Ok(value) => {
                                if ours {
                                    // Still the computation we started.
                                    entries.insert(completion_key, Entry::Fresh(value.clone()));
                                } else if !entries.contains_key(&completion_key) {
                                    // Invalidated while in flight: the value is
                                    // usable but must not be served as fresh.
                                    log::debug!("fetch outlived an invalidation; storing its result as stale");
                                    entries.insert(completion_key, Entry::Stale(value.clone()));
                                }
                                // Otherwise a newer computation or value took
                                // the slot; leave it alone.
                            }
                            Err(_) => {
                                if ours {
                                    entries.remove(&completion_key);
                                }
                            }
                        }
                        result
                    }
                    .boxed_local()
                    .shared();
                    entries.insert(
                        key,
                        Entry::Computing {
                            generation,
                            future: future.clone(),
                        },
                    );
                    future
                }
            }
        };
        future.await
    }

    /// Run `mutation`; on success mark every key in `invalidates` stale and
    /// queue notifications for their subscribers. On failure nothing is
    /// invalidated.
    pub async fn mutate<T, Fut>(&self, mutation: Fut, invalidates: &[K]) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let outcome = mutation.await?;
        for key in invalidates {
            self.invalidate(key);
        }
        Ok(outcome)
    }

    /// Mark `key` stale and queue notifications for its subscribers.
    ///
    /// Subscribers are notified even when nothing is cached under `key` yet:
    /// a consumer may keep its own materialized state (e.g. a paginated list)
    /// and only use the key as an invalidation channel.
    pub fn invalidate(&self, key: &K) {
        {
            let mut entries = self.entries.borrow_mut();
            match entries.remove(key) {
                Some(Entry::Fresh(value)) | Some(Entry::Stale(value)) => {
                    entries.insert(key.clone(), Entry::Stale(value));
                }
                // Dropping a computing entry makes its completion see a
                // generation mismatch and store its late result as stale.
                Some(Entry::Computing { .. }) | None => {}
            }
        }
        self.queue_notifications(key);
    }

    /// The cached value under `key`, fresh or stale, without fetching.
    pub fn peek(&self, key: &K) -> Option<V> {
        match self.entries.borrow().get(key) {
            Some(Entry::Fresh(value)) | Some(Entry::Stale(value)) => Some(value.clone()),
            Some(Entry::Computing { .. }) | None => None,
        }
    }

    /// Whether the next read of `key` would refetch. An in-flight fetch counts
    /// as not stale (the read would join it rather than start another).
    pub fn is_stale(&self, key: &K) -> bool {
        !matches!(
            self.entries.borrow().get(key),
            Some(Entry::Fresh(_)) | Some(Entry::Computing { .. })
        )
    }

    /// Store `value` under `key` as fresh, e.g. to seed the cache with a value
    /// that arrived as part of another response.
    pub fn put(&self, key: K, value: V) {
        self.entries.borrow_mut().insert(key, Entry::Fresh(value));
    }

    /// Drop every entry. Subscriptions are kept.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Call `callback` (via [`Self::drain_due_notifications`]) whenever `key`
    /// is invalidated.
    pub fn subscribe(&self, key: K, callback: impl Fn() + 'static) -> ListenerKey {
        self.listeners.borrow_mut().insert(Listener {
            key,
            callback: Rc::new(callback),
        })
    }

    pub fn unsubscribe(&self, listener: ListenerKey) {
        self.listeners.borrow_mut().remove(listener);
    }

    /// Take the queued notifications as ready-to-call closures.
    ///
    /// The callbacks are not run here: the caller invokes them after every
    /// borrow of the cache has been released, since they typically re-enter
    /// code that borrows it.
    #[must_use]
    pub fn drain_due_notifications(&self) -> Vec<Box<dyn FnOnce()>> {
        let due = std::mem::take(&mut *self.due.borrow_mut());
        let listeners = self.listeners.borrow();
        due.into_iter()
            .filter_map(|listener_key| {
                listeners.get(listener_key).map(|listener| {
                    let callback = Rc::clone(&listener.callback);
                    Box::new(move || callback()) as Box<dyn FnOnce()>
                })
            })
            .collect()
    }

    fn queue_notifications(&self, key: &K) {
        let listeners = self.listeners.borrow();
        let mut due = self.due.borrow_mut();
        for (listener_key, listener) in listeners.iter() {
            if listener.key == *key && !due.contains(&listener_key) {
                due.push(listener_key);
            }
        }
    }

    fn next_generation(&self) -> u64 {
        let next = self.generation.get() + 1;
        self.generation.set(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::executor::{LocalPool, block_on};
    use futures::task::LocalSpawnExt as _;

    fn counting_fetch(calls: &Rc<Cell<u32>>, value: u32) -> impl Future<Output = Result<u32, String>> + 'static {
        let calls = Rc::clone(calls);
        async move {
            calls.set(calls.get() + 1);
            Ok(value)
        }
    }

    /// Resolves on its second poll, so concurrently-started queries overlap.
    fn yield_once() -> impl Future<Output = ()> {
        let mut yielded = false;
        futures::future::poll_fn(move |cx| {
            if yielded {
                std::task::Poll::Ready(())
            } else {
                yielded = true;
                cx.waker().wake_by_ref();
                std::task::Poll::Pending
            }
        })
    }

    #[test]
    fn test_query_caches_until_invalidated() {
        let cache = QueryCache::<&str, u32, String>::new();
        let calls = Rc::new(Cell::new(0));

        block_on(async {
            assert_eq!(cache.query("posts", counting_fetch(&calls, 1)).await, Ok(1));
            assert_eq!(cache.query("posts", counting_fetch(&calls, 2)).await, Ok(1));
            assert_eq!(calls.get(), 1);

            cache.invalidate(&"posts");
            assert!(cache.is_stale(&"posts"));
            assert_eq!(cache.query("posts", counting_fetch(&calls, 3)).await, Ok(3));
            assert_eq!(calls.get(), 2);
        });
    }

    #[test]
    fn test_concurrent_queries_share_one_fetch() {
        let cache = QueryCache::<&str, u32, String>::new();
        let calls = Rc::new(Cell::new(0));

        let slow = {
            let calls = Rc::clone(&calls);
            async move {
                calls.set(calls.get() + 1);
                yield_once().await;
                Ok(42)
            }
        };

        block_on(async {
            let first = cache.query("posts", slow);
            let second = cache.query("posts", counting_fetch(&calls, 99));
            let (first, second) = futures::join!(first, second);
            assert_eq!(first, Ok(42));
            assert_eq!(second, Ok(42));
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_failed_fetch_stores_nothing() {
        let cache = QueryCache::<&str, u32, String>::new();

        block_on(async {
            let result = cache
                .query("posts", async { Err("network down".to_string()) })
                .await;
            assert_eq!(result, Err("network down".to_string()));
            assert_eq!(cache.peek(&"posts"), None);

            // The next read runs its fetch rather than replaying the failure.
            assert_eq!(cache.query("posts", async { Ok(5) }).await, Ok(5));
        });
    }

    #[test]
    fn test_mutation_invalidates_declared_keys_only() {
        let cache = QueryCache::<&str, u32, String>::new();
        let calls = Rc::new(Cell::new(0));

        block_on(async {
            cache.query("posts", counting_fetch(&calls, 1)).await.unwrap();
            cache.query("user", counting_fetch(&calls, 2)).await.unwrap();
            assert_eq!(calls.get(), 2);

            cache
                .mutate(async { Ok::<_, String>(()) }, &["posts"])
                .await
                .unwrap();

            // "posts" refetches, "user" does not.
            cache.query("posts", counting_fetch(&calls, 3)).await.unwrap();
            cache.query("user", counting_fetch(&calls, 4)).await.unwrap();
            assert_eq!(calls.get(), 3);
        });
    }

    #[test]
    fn test_failed_mutation_invalidates_nothing() {
        let cache = QueryCache::<&str, u32, String>::new();
        let calls = Rc::new(Cell::new(0));

        block_on(async {
            cache.query("posts", counting_fetch(&calls, 1)).await.unwrap();

            let result: Result<(), String> = cache
                .mutate(async { Err("rejected".to_string()) }, &["posts"])
                .await;
            assert!(result.is_err());

            cache.query("posts", counting_fetch(&calls, 2)).await.unwrap();
            assert_eq!(calls.get(), 1);
        });
        assert!(cache.drain_due_notifications().is_empty());
    }

    #[test]
    fn test_subscribers_notified_once_per_drain() {
        let cache = QueryCache::<&str, u32, String>::new();
        let notified = Rc::new(Cell::new(0));

        let listener = {
            let notified = Rc::clone(&notified);
            cache.subscribe("posts", move || notified.set(notified.get() + 1))
        };
        cache.subscribe("user", || panic!("wrong key notified"));

        // Two invalidations before a flush collapse into one notification.
        cache.invalidate(&"posts");
        cache.invalidate(&"posts");
        for callback in cache.drain_due_notifications() {
            callback();
        }
        assert_eq!(notified.get(), 1);

        cache.unsubscribe(listener);
        cache.invalidate(&"posts");
        assert!(cache.drain_due_notifications().is_empty());
    }

    #[test]
    fn test_invalidated_in_flight_result_lands_stale() {
        let mut pool = LocalPool::new();
        let cache = Rc::new(QueryCache::<&str, u32, String>::new());
        let (tx, rx) = futures::channel::oneshot::channel::<u32>();

        {
            let cache = Rc::clone(&cache);
            pool.spawner()
                .spawn_local(async move {
                    let value = cache
                        .query("posts", async move { Ok(rx.await.unwrap()) })
                        .await;
                    assert_eq!(value, Ok(7));
                })
                .unwrap();
        }
        pool.run_until_stalled();

        // The fetch is parked on the channel; invalidate while it is in flight.
        cache.invalidate(&"posts");
        tx.send(7).unwrap();
        pool.run();

        assert_eq!(cache.peek(&"posts"), Some(7));
        assert!(cache.is_stale(&"posts"));
    }

    #[test]
    fn test_put_and_clear() {
        let cache = QueryCache::<&str, u32, String>::new();
        cache.put("user", 11);
        assert_eq!(cache.peek(&"user"), Some(11));
        assert!(!cache.is_stale(&"user"));

        cache.clear();
        assert_eq!(cache.peek(&"user"), None);
        assert!(cache.is_stale(&"user"));
    }
}
