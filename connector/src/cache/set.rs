//! Set-valued cache for entity directories.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use super::value::{CacheConfig, CacheState, CachedValue};
use crate::error::Result;

/// An entity with a stable identity, so a fetched collection can be treated as a set.
pub trait Entity: Clone + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;
}

/// Entities unique by [`Entity::key`]; a later duplicate replaces the earlier one.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySet<T: Entity> {
    items: Vec<T>,
    index: HashMap<T::Key, usize>,
}

impl<T: Entity> EntitySet<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.index.get(key).map(|&idx| &self.items[idx])
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<T: Entity> Default for EntitySet<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Entity> FromIterator<T> for EntitySet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::default();
        for item in iter {
            match set.index.get(&item.key()) {
                Some(&idx) => set.items[idx] = item,
                None => {
                    set.index.insert(item.key(), set.items.len());
                    set.items.push(item);
                }
            }
        }
        set
    }
}

/// Owning iterator over a shared [`EntitySet`] snapshot.
///
/// Items are cloned one at a time as the iterator advances.
#[derive(Debug, Clone)]
pub struct EntityStream<T: Entity> {
    set: Arc<EntitySet<T>>,
    next: usize,
}

impl<T: Entity> EntityStream<T> {
    #[must_use]
    pub fn new(set: Arc<EntitySet<T>>) -> Self {
        Self { set, next: 0 }
    }
}

impl<T: Entity> Iterator for EntityStream<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let item = self.set.items.get(self.next)?.clone();
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.set.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl<T: Entity> ExactSizeIterator for EntityStream<T> {}

/// A [`CachedValue`] holding a whole entity set.
///
/// Every refresh replaces the set; entities missing from the latest fetch are gone.
#[derive(Debug)]
pub struct CachedSet<T: Entity> {
    inner: CachedValue<Arc<EntitySet<T>>>,
}

impl<T: Entity> CachedSet<T> {
    #[must_use]
    pub fn new<F, Fut>(name: &'static str, config: CacheConfig, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
    {
        let inner = CachedValue::new(name, config, move || {
            let fetched = fetch();
            async move { fetched.await.map(|items| Arc::new(items.into_iter().collect())) }
        });
        Self { inner }
    }

    /// Fresh set, refreshing it first when missing or older than the TTL.
    pub async fn get(&self) -> Result<Arc<EntitySet<T>>> {
        self.inner.get().await
    }

    pub async fn get_from_cache(&self) -> CacheState<Arc<EntitySet<T>>> {
        self.inner.get_from_cache().await
    }

    /// Iterate the cached set, even a stale one. Only an empty cache is fetched
    /// (and waited for) first.
    pub async fn stream(&self) -> Result<EntityStream<T>> {
        let set = match self.inner.get_from_cache().await.into_value() {
            Some(set) => set,
            None => self.inner.get().await?,
        };
        Ok(EntityStream::new(set))
    }

    pub async fn is_stale(&self) -> bool {
        self.inner.is_stale().await
    }

    pub async fn invalidate(&self) {
        self.inner.invalidate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepositoryError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: &'static str,
        rev: u32,
    }

    impl Entity for Item {
        type Key = &'static str;

        fn key(&self) -> Self::Key {
            self.id
        }
    }

    fn item(id: &'static str, rev: u32) -> Item {
        Item { id, rev }
    }

    fn config() -> CacheConfig {
        CacheConfig::new(Duration::from_secs(3600), Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn entity_set_deduplicates_by_key() {
        let set: EntitySet<Item> = vec![item("a", 1), item("b", 1), item("a", 2)]
            .into_iter()
            .collect();

        assert_eq!(set.len(), 2);
        assert_eq!(set.get(&"a"), Some(&item("a", 2)));
        assert!(set.contains(&"b"));
        assert!(!set.contains(&"c"));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_yields_each_entity_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = CachedSet::new("items", config(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(vec![item("a", 1), item("b", 1), item("b", 1)]) }
        });

        for _ in 0..2 {
            let mut ids: Vec<_> = cache.stream().await.unwrap().map(|i| i.id).collect();
            ids.sort_unstable();
            assert_eq!(ids, vec!["a", "b"]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_prefers_stale_value_over_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = CachedSet::new("items", config(), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(vec![item("a", 1)])
                } else {
                    Ok(vec![item("c", 1)])
                }
            }
        });

        cache.get().await.unwrap();
        tokio::time::advance(Duration::from_secs(7200)).await;
        assert!(cache.is_stale().await);

        let ids: Vec<_> = cache.stream().await.unwrap().map(|i| i.id).collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // an explicit get replaces the set wholesale
        let set = cache.get().await.unwrap();
        assert!(!set.contains(&"a"));
        assert!(set.contains(&"c"));
        assert!(!cache.is_stale().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_on_empty_cache_propagates_failure() {
        let cache: CachedSet<Item> = CachedSet::new("items", config(), || async {
            Err(RepositoryError::Timeout)
        });

        assert_eq!(cache.stream().await.unwrap_err(), RepositoryError::Timeout);
    }

    #[test]
    fn stream_size_hint_counts_down() {
        let set: Arc<EntitySet<Item>> =
            Arc::new(vec![item("a", 1), item("b", 1)].into_iter().collect());
        let mut stream = EntityStream::new(set);
        assert_eq!(stream.len(), 2);
        stream.next();
        assert_eq!(stream.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn debug_output_names_cached_entities() {
        let cache = CachedSet::new("items", config(), || async { Ok(vec![item("a", 1)]) });
        let stream = cache.stream().await.unwrap();

        let rendered = format!("{stream:?}");
        assert!(rendered.contains("EntityStream"));
        assert!(rendered.contains("\"a\""));
        assert!(format!("{cache:?}").contains("CachedSet"));
    }
}
