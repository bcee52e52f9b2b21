//! Keyed store of per-node model instances
//!
//! Each registry owns one lazily-created instance per key. Entries are never
//! evicted, so repeated lookups of a key always yield the same `Arc`.

use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

type Factory<K, T> = Arc<dyn Fn(&K) -> T + Send + Sync>;

/// Thread-safe get-or-create registry
///
/// Clones are cheap handles onto the same underlying map. The map's shard
/// lock is held only for the insert-if-absent step; instances manage their
/// own exclusion afterwards.
pub struct ModelRegistry<K, T> {
    entries: Arc<DashMap<K, Arc<T>>>,
    factory: Factory<K, T>,
}

impl<K, T> Clone for ModelRegistry<K, T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<K, T> ModelRegistry<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    /// Create an empty registry that builds missing entries with `factory`
    pub fn new(factory: impl Fn(&K) -> T + Send + Sync + 'static) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            factory: Arc::new(factory),
        }
    }

    /// Return the instance for `key`, creating it if absent
    pub fn get_or_create<Q>(&self, key: &Q) -> Arc<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(existing) = self.entries.get(key) {
            return Arc::clone(existing.value());
        }

        let owned = key.to_owned();
        let entry = self.entries.entry(owned.clone()).or_insert_with(|| {
            debug!(key = ?owned, "Creating registry entry");
            Arc::new((self.factory)(&owned))
        });
        Arc::clone(entry.value())
    }

    /// Return the instance for `key` without creating it
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<T>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|r| Arc::clone(r.value()))
    }

    /// All keys currently registered
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|r| r.key().clone()).collect()
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
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Counter {
        value: Mutex<u32>,
    }

    fn counter_registry() -> ModelRegistry<String, Counter> {
        ModelRegistry::new(|_key: &String| Counter {
            value: Mutex::new(0),
        })
    }

    #[test]
    fn test_get_or_create_returns_same_instance() {
        let registry = counter_registry();

        let a = registry.get_or_create("n1");
        let b = registry.get_or_create("n1");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_keys_get_distinct_instances() {
        let registry = counter_registry();

        let a = registry.get_or_create("n1");
        let b = registry.get_or_create("n2");

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_get_does_not_create() {
        let registry = counter_registry();

        assert!(registry.get("n1").is_none());
        assert!(registry.is_empty());

        let created = registry.get_or_create("n1");
        let found = registry.get("n1").unwrap();
        assert!(Arc::ptr_eq(&created, &found));
    }

    #[test]
    fn test_state_is_shared_through_handles() {
        let registry = counter_registry();
        let handle = registry.clone();

        *registry.get_or_create("n1").value.lock().unwrap() = 42;

        assert_eq!(*handle.get("n1").unwrap().value.lock().unwrap(), 42);
        assert_eq!(handle.keys(), vec!["n1".to_string()]);
    }

    #[test]
    fn test_concurrent_get_or_create_builds_once() {
        use std::thread;

        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let registry: ModelRegistry<String, usize> = ModelRegistry::new(move |_key: &String| {
            counter.fetch_add(1, Ordering::SeqCst)
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.get_or_create("shared"))
            })
            .collect();

        let instances: Vec<Arc<usize>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
