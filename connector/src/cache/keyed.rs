//! Registry of lazily created per-key caches.

use dashmap::DashMap;
use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use super::value::CachedValue;

/// Concurrent map from key to its own [`CachedValue`].
///
/// Entries are created on first access and live until removed explicitly.
/// Creation is atomic per key: racing first accesses observe the same instance.
pub struct KeyedCache<K, T> {
    entries: DashMap<K, Arc<CachedValue<T>>>,
    factory: Box<dyn Fn(&K) -> CachedValue<T> + Send + Sync>,
}

impl<K, T> fmt::Debug for KeyedCache<K, T>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedCache")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl<K, T> KeyedCache<K, T>
where
    K: Clone + Eq + Hash,
    T: Clone + Send + Sync + 'static,
{
    /// `factory` builds the cache for a key the first time it is requested.
    #[must_use]
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&K) -> CachedValue<T> + Send + Sync + 'static,
    {
        Self {
            entries: DashMap::new(),
            factory: Box::new(factory),
        }
    }

    /// Get the cache for `key`, creating it if needed.
    pub fn get_or_create<Q>(&self, key: &Q) -> Arc<CachedValue<T>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        // Fast path: shared shard lock
        if let Some(entry) = self.entries.get(key) {
            return Arc::clone(entry.value());
        }

        // Slow path: the entry API holds the shard write lock while the factory runs
        let key = key.to_owned();
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new((self.factory)(&key)));
        Arc::clone(entry.value())
    }

    /// Get the cache for `key` if it exists (no creation).
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<CachedValue<T>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove the cache for `key`, whatever instance it is.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).is_some()
    }

    /// Remove the cache for `key` only if it is still `expected`.
    ///
    /// A caller holding an old instance must not evict a newer one created
    /// after an earlier removal.
    pub fn remove_entry<Q>(&self, key: &Q, expected: &Arc<CachedValue<T>>) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, expected))
            .is_some()
    }

    /// Keep only the entries whose key satisfies `keep`. Returns how many were removed.
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|key, _| keep(key));
        before.saturating_sub(self.entries.len())
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn registry(created: &Arc<AtomicUsize>) -> KeyedCache<String, String> {
        let created = Arc::clone(created);
        let config = CacheConfig::new(Duration::from_secs(60), Duration::from_secs(1)).unwrap();
        KeyedCache::new(move |key: &String| {
            created.fetch_add(1, Ordering::SeqCst);
            let key = key.clone();
            CachedValue::new("keyed", config, move || {
                let value = format!("value-{key}");
                async move { Ok(value) }
            })
        })
    }

    #[tokio::test]
    async fn get_or_create_reuses_instance() {
        let created = Arc::new(AtomicUsize::new(0));
        let registry = registry(&created);

        let a = registry.get_or_create("alice");
        let b = registry.get_or_create("alice");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(a.get().await.unwrap(), "value-alice");

        registry.get_or_create("bob");
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_first_access_creates_one_entry() {
        let created = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(registry(&created));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.get_or_create("carol") })
            })
            .collect();

        let mut entries = Vec::new();
        for handle in handles {
            entries.push(handle.await.unwrap());
        }

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(entries.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn remove_entry_ignores_newer_instance() {
        let created = Arc::new(AtomicUsize::new(0));
        let registry = registry(&created);

        let old = registry.get_or_create("dave");
        assert!(registry.remove("dave"));
        let new = registry.get_or_create("dave");

        assert!(!registry.remove_entry("dave", &old));
        assert!(registry.contains_key("dave"));
        assert!(registry.remove_entry("dave", &new));
        assert!(registry.is_empty());
    }

    #[test]
    fn retain_drops_unknown_keys() {
        let created = Arc::new(AtomicUsize::new(0));
        let registry = registry(&created);
        for key in ["a", "b", "c"] {
            registry.get_or_create(key);
        }

        assert_eq!(registry.retain(|key| key != "b"), 1);
        assert!(registry.get("b").is_none());
        assert!(registry.get("a").is_some());
    }
}
