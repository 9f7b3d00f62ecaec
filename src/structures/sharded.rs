use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::ConcurrentMap;

// DashMap guards each shard with an RwLock. Every removal takes the shard's
// write lock, even when the key is absent, so its delete always writes.
impl<K, V> ConcurrentMap<K, V> for DashMap<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn insert_if_absent(&self, key: K, value: V) -> Option<V> {
        match self.entry(key) {
            Entry::Occupied(occupied) => Some(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(value);
                None
            }
        }
    }

    fn take_and_remove(&self, key: &K) -> Option<V> {
        self.remove(key).map(|(_, value)| value)
    }

    fn load(&self, key: &K) -> Option<V> {
        self.get(key).map(|entry| entry.value().clone())
    }

    fn store(&self, key: K, value: V) {
        self.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use crate::structures::ConcurrentMap;
    use dashmap::DashMap;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_single_thread_semantics() {
        let map: DashMap<&'static str, u64> = DashMap::new();

        assert_eq!(map.take_and_remove(&"k"), None);
        assert_eq!(map.insert_if_absent("k", 5), None);
        assert_eq!(map.insert_if_absent("k", 7), Some(5));
        assert_eq!(ConcurrentMap::load(&map, &"k"), Some(5));
        assert_eq!(map.take_and_remove(&"k"), Some(5));
        assert_eq!(ConcurrentMap::load(&map, &"k"), None);

        map.store("k", 1);
        map.store("k", 2);
        assert_eq!(ConcurrentMap::load(&map, &"k"), Some(2));
    }

    #[test]
    fn test_multithreaded_insert_single_winner() {
        let map: Arc<DashMap<&'static str, u64>> = Arc::new(DashMap::new());
        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let map_clone = map.clone();
                thread::spawn(move || map_clone.insert_if_absent("k", i).is_none())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
