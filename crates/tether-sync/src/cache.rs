//! Observable keyed cache.
//!
//! Rows live in a copy-on-write map behind a lock: a batch of changes is
//! applied under the write lock, so a snapshot taken at any point sees either
//! none or all of a batch. Subscribers are notified after the lock is
//! released and pull a fresh snapshot themselves.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

type Callback = Arc<dyn Fn() + Send + Sync>;

/// One mutation within a batch.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheChange<K, V> {
    Upsert { key: K, value: V },
    Remove(K),
    Clear,
}

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback,
}

struct Inner<K, V> {
    rows: RwLock<Arc<BTreeMap<K, V>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

pub struct ObservableCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for ObservableCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for ObservableCache<K, V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                rows: RwLock::new(Arc::new(BTreeMap::new())),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

impl<K, V> ObservableCache<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// The current rows, in key order. Later changes never show through.
    pub fn snapshot(&self) -> Arc<BTreeMap<K, V>> {
        Arc::clone(&self.inner.rows.read())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.rows.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.rows.read().is_empty()
    }

    /// Apply a batch atomically, then notify subscribers once.
    pub fn apply(&self, changes: impl IntoIterator<Item = CacheChange<K, V>>) -> usize {
        let mut applied = 0;
        {
            let mut guard = self.inner.rows.write();
            let rows = Arc::make_mut(&mut *guard);
            for change in changes {
                applied += 1;
                match change {
                    CacheChange::Upsert { key, value } => {
                        let _ = rows.insert(key, value);
                    }
                    CacheChange::Remove(key) => {
                        let _ = rows.remove(&key);
                    }
                    CacheChange::Clear => rows.clear(),
                }
            }
        }
        if applied > 0 {
            self.notify();
        }
        applied
    }

    pub fn upsert(&self, key: K, value: V) {
        let _ = self.apply([CacheChange::Upsert { key, value }]);
    }

    pub fn remove(&self, key: K) {
        let _ = self.apply([CacheChange::Remove(key)]);
    }

    /// Register a change callback. It stays registered until the returned
    /// handle is unsubscribed or dropped.
    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.inner.subscribers.lock().push(Subscriber {
            id,
            active: Arc::clone(&active),
            callback: Arc::new(callback),
        });

        let weak: Weak<Inner<K, V>> = Arc::downgrade(&self.inner);
        Subscription {
            active,
            detach: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.subscribers.lock().retain(|s| s.id != id);
                }
            })),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    fn notify(&self) {
        let targets: Vec<(Arc<AtomicBool>, Callback)> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|s| (Arc::clone(&s.active), Arc::clone(&s.callback)))
            .collect();

        for (active, callback) in targets {
            // Skips anyone unsubscribed by an earlier callback in this round.
            if active.load(Ordering::Acquire) {
                callback();
            }
        }
    }
}

/// Handle for a registered callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    active: Arc<AtomicBool>,
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop receiving notifications. Safe to call from inside the callback
    /// itself, and more than once.
    pub fn unsubscribe(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.is_active()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (hits, move || {
            let _ = h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn batch_notifies_once() {
        let cache: ObservableCache<u32, &str> = ObservableCache::new();
        let (hits, cb) = counter();
        let _sub = cache.subscribe(cb);

        let applied = cache.apply([
            CacheChange::Upsert { key: 1, value: "a" },
            CacheChange::Upsert { key: 2, value: "b" },
            CacheChange::Remove(1),
        ]);

        assert_eq!(applied, 3);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&2), Some("b"));
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn empty_batch_is_silent() {
        let cache: ObservableCache<u32, u32> = ObservableCache::new();
        let (hits, cb) = counter();
        let _sub = cache.subscribe(cb);
        assert_eq!(cache.apply(Vec::new()), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn snapshot_is_isolated_from_later_changes() {
        let cache = ObservableCache::new();
        cache.upsert("k", 1);
        let before = cache.snapshot();

        cache.apply([CacheChange::Upsert { key: "k", value: 2 }, CacheChange::Upsert { key: "j", value: 3 }]);

        assert_eq!(before.len(), 1);
        assert_eq!(before.get("k"), Some(&1));
        assert_eq!(cache.snapshot().len(), 2);
    }

    #[test]
    fn snapshot_inside_callback_sees_whole_batch() {
        let cache: ObservableCache<u32, u32> = ObservableCache::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (c, s) = (cache.clone(), Arc::clone(&seen));
        let _sub = cache.subscribe(move || s.lock().push(c.len()));

        cache.apply((0..5).map(|i| CacheChange::Upsert { key: i, value: i }));
        cache.apply([CacheChange::Clear]);

        assert_eq!(*seen.lock(), vec![5, 0]);
    }

    #[test]
    fn drop_unsubscribes() {
        let cache: ObservableCache<u32, u32> = ObservableCache::new();
        let (hits, cb) = counter();
        let sub = cache.subscribe(cb);
        assert_eq!(cache.subscriber_count(), 1);

        drop(sub);
        cache.upsert(1, 1);

        assert_eq!(cache.subscriber_count(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_from_within_callback() {
        let cache: ObservableCache<u32, u32> = ObservableCache::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let (s, h) = (Arc::clone(&slot), Arc::clone(&hits));
        let sub = cache.subscribe(move || {
            let _ = h.fetch_add(1, Ordering::SeqCst);
            if let Some(mut sub) = s.lock().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock() = Some(sub);

        cache.upsert(1, 1);
        cache.upsert(2, 2);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(cache.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribed_peer_is_skipped_in_same_round() {
        let cache: ObservableCache<u32, u32> = ObservableCache::new();
        let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let s = Arc::clone(&victim_slot);
        let _first = cache.subscribe(move || {
            if let Some(mut victim) = s.lock().take() {
                victim.unsubscribe();
            }
        });
        let (victim_hits, cb) = counter();
        *victim_slot.lock() = Some(cache.subscribe(cb));

        cache.upsert(1, 1);
        assert_eq!(victim_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscription_outliving_cache_is_harmless() {
        let cache: ObservableCache<u32, u32> = ObservableCache::new();
        let mut sub = cache.subscribe(|| {});
        drop(cache);
        sub.unsubscribe();
        assert!(!sub.is_active());
    }
}
