use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use super::ConcurrentMap;

const DEFAULT_CAPACITY: usize = 256;
const UNCLAIMED: u64 = 0;
const VACANT: u64 = 0;

/// Largest value a [`SlotMap`] can hold. The low bit of a value word is the
/// presence mark.
pub const MAX_VALUE: u64 = u64::MAX >> 1;

/// A lock-free, fixed-capacity map from hashable keys to `u64` values.
///
/// The table is an array of slots probed linearly from the hash of the key.
/// A slot is claimed once, by CAS on its hash word, and is never given back:
/// removing a key only clears the value word. Keys are not stored, only their
/// 64-bit hash, so two keys that hash to the same value are the same key as far
/// as the map is concerned.
///
/// Each slot holds two words:
///
/// * the hash word, `0` while unclaimed (a real hash of `0` is stored as `1`);
/// * the value word, `0` while vacant and `(value << 1) | 1` while present.
///
/// The interesting property for the litmus harness is the read path. Looking
/// up a key that was never inserted, loading any key, and removing a key that
/// is currently vacant all complete with `Acquire` loads only, so they give no
/// store-to-load ordering to the caller. Every write (`store`, successful
/// `insert_if_absent`, removal of a present value) is a `SeqCst`
/// read-modify-write.
pub struct SlotMap<K> {
    slots: Box<[Slot]>,
    hasher: RandomState,
    mask: usize,
    marker: PhantomData<fn(&K)>,
}

#[derive(Default)]
struct Slot {
    hash: AtomicU64,
    value: AtomicU64,
}

impl<K: Hash> SlotMap<K> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a map with room for at least `capacity` distinct keys. The
    /// capacity is rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        let size = capacity.max(2).next_power_of_two();
        let mut slots = Vec::with_capacity(size);
        for _ in 0..size {
            slots.push(Slot::default());
        }

        Self {
            slots: slots.into_boxed_slice(),
            hasher: RandomState::new(),
            mask: size - 1,
            marker: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of keys currently holding a value. Not a linearizable snapshot.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.value.load(Ordering::Acquire) != VACANT)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn hash(&self, key: &K) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        match hasher.finish() {
            UNCLAIMED => 1,
            hash => hash,
        }
    }

    /// Find the slot claimed for `hash`. Loads only.
    fn find(&self, hash: u64) -> Option<&Slot> {
        let start = hash as usize & self.mask;
        for i in 0..self.slots.len() {
            let slot = &self.slots[(start + i) & self.mask];
            match slot.hash.load(Ordering::Acquire) {
                UNCLAIMED => return None,
                h if h == hash => return Some(slot),
                _ => {}
            }
        }
        None
    }

    /// Find the slot for `hash`, claiming the first unclaimed one on the probe
    /// sequence if the key has never been seen.
    /// # Panics
    /// If every slot is claimed by another key.
    fn claim(&self, hash: u64) -> &Slot {
        let start = hash as usize & self.mask;
        for i in 0..self.slots.len() {
            let slot = &self.slots[(start + i) & self.mask];
            let current = slot.hash.load(Ordering::Acquire);
            if current == hash {
                return slot;
            }
            if current == UNCLAIMED {
                match slot.hash.compare_exchange(UNCLAIMED, hash, Ordering::SeqCst, Ordering::Acquire) {
                    Ok(_) => return slot,
                    // Someone else claimed it, maybe for the same key
                    Err(winner) if winner == hash => return slot,
                    Err(_) => {}
                }
            }
        }
        panic!("SlotMap is full ({} slots)", self.slots.len());
    }
}

fn encode(value: u64) -> u64 {
    assert!(value <= MAX_VALUE, "SlotMap values must fit in 63 bits");
    (value << 1) | 1
}

fn decode(word: u64) -> Option<u64> {
    match word {
        VACANT => None,
        word => Some(word >> 1),
    }
}

impl<K: Hash> Default for SlotMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash> ConcurrentMap<K, u64> for SlotMap<K> {
    fn insert_if_absent(&self, key: K, value: u64) -> Option<u64> {
        let new = encode(value);
        let slot = self.claim(self.hash(&key));
        let current = slot.value.load(Ordering::Acquire);
        if current != VACANT {
            return decode(current);
        }
        match slot.value.compare_exchange(VACANT, new, Ordering::SeqCst, Ordering::Acquire) {
            Ok(_) => None,
            Err(existing) => decode(existing),
        }
    }

    fn take_and_remove(&self, key: &K) -> Option<u64> {
        let slot = self.find(self.hash(key))?;
        if slot.value.load(Ordering::Acquire) == VACANT {
            return None;
        }
        decode(slot.value.swap(VACANT, Ordering::SeqCst))
    }

    fn load(&self, key: &K) -> Option<u64> {
        let slot = self.find(self.hash(key))?;
        decode(slot.value.load(Ordering::Acquire))
    }

    fn store(&self, key: K, value: u64) {
        let new = encode(value);
        let slot = self.claim(self.hash(&key));
        slot.value.swap(new, Ordering::SeqCst);
    }
}

impl<K> fmt::Debug for SlotMap<K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut map = f.debug_map();
        for slot in self.slots.iter() {
            let hash = slot.hash.load(Ordering::Acquire);
            if hash != UNCLAIMED {
                map.entry(&format_args!("{:#018x}", hash), &decode(slot.value.load(Ordering::Acquire)));
            }
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{SlotMap, MAX_VALUE};
    use crate::structures::ConcurrentMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::thread::JoinHandle;

    #[test]
    fn test_single_thread_semantics() {
        let map: SlotMap<&'static str> = SlotMap::new();

        assert_eq!(map.load(&"k"), None);
        assert_eq!(map.take_and_remove(&"k"), None);

        assert_eq!(map.insert_if_absent("k", 5), None);
        assert_eq!(map.insert_if_absent("k", 7), Some(5));
        assert_eq!(map.load(&"k"), Some(5));

        assert_eq!(map.take_and_remove(&"k"), Some(5));
        assert_eq!(map.take_and_remove(&"k"), None);
        assert_eq!(map.load(&"k"), None);

        map.store("k", 9);
        map.store("k", 10);
        assert_eq!(map.load(&"k"), Some(10));
        assert_eq!(map.insert_if_absent("k", 11), Some(10));
    }

    #[test]
    fn test_zero_and_max_values() {
        let map: SlotMap<u32> = SlotMap::new();
        map.store(1, 0);
        map.store(2, MAX_VALUE);
        assert_eq!(map.load(&1), Some(0));
        assert_eq!(map.load(&2), Some(MAX_VALUE));
        assert_eq!(map.take_and_remove(&1), Some(0));
    }

    #[test]
    #[should_panic(expected = "63 bits")]
    fn test_value_too_large() {
        let map: SlotMap<u32> = SlotMap::new();
        map.store(1, u64::MAX);
    }

    #[test]
    fn test_fill_to_capacity() {
        let map: SlotMap<u64> = SlotMap::with_capacity(64);
        assert_eq!(map.capacity(), 64);
        for i in 0..64 {
            assert_eq!(map.insert_if_absent(i, i), None);
        }
        for i in 0..64 {
            assert_eq!(map.load(&i), Some(i));
        }
        assert_eq!(map.len(), 64);
        for i in 0..32 {
            assert_eq!(map.take_and_remove(&i), Some(i));
        }
        assert_eq!(map.len(), 32);
        // Removed keys keep their slot, so reinserting needs no new space
        for i in 0..32 {
            assert_eq!(map.insert_if_absent(i, i + 100), None);
        }
        assert_eq!(map.load(&3), Some(103));
    }

    #[test]
    #[should_panic(expected = "full")]
    fn test_overfull_panics() {
        let map: SlotMap<u64> = SlotMap::with_capacity(4);
        for i in 0..5 {
            map.store(i, i);
        }
    }

    #[test]
    fn test_multithreaded_insert_single_winner() {
        let map: Arc<SlotMap<&'static str>> = Arc::new(SlotMap::new());
        let winners = Arc::new(AtomicUsize::new(0));
        let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();

        for i in 0..8u64 {
            let map_clone = map.clone();
            let winners_clone = winners.clone();
            wait_vec.push(thread::spawn(move || {
                if map_clone.insert_if_absent("k", i).is_none() {
                    winners_clone.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        for handle in wait_vec {
            match handle.join() {
                Ok(_) => {},
                Err(_) => panic!("A thread panicked, test failed!")
            }
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(map.load(&"k").is_some());
    }

    #[test]
    fn test_multithreaded_take_single_taker() {
        for _ in 0..200 {
            let map: Arc<SlotMap<&'static str>> = Arc::new(SlotMap::new());
            map.store("k", 888);
            let takers = Arc::new(AtomicUsize::new(0));
            let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();

            for _ in 0..4 {
                let map_clone = map.clone();
                let takers_clone = takers.clone();
                wait_vec.push(thread::spawn(move || {
                    if let Some(value) = map_clone.take_and_remove(&"k") {
                        assert_eq!(value, 888);
                        takers_clone.fetch_add(1, Ordering::SeqCst);
                    }
                }));
            }

            for handle in wait_vec {
                handle.join().unwrap();
            }
            assert_eq!(takers.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_typical() {
        let map: Arc<SlotMap<u64>> = Arc::new(SlotMap::with_capacity(4096));
        let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();
        let num_threads = 8;

        for t in 0..num_threads {
            let map_clone = map.clone();
            wait_vec.push(thread::spawn(move || {
                let base = t * 1000;
                for i in base..base + 200 {
                    map_clone.store(i, i);
                }
                for i in base..base + 200 {
                    assert_eq!(map_clone.load(&i), Some(i));
                }
                for i in base..base + 100 {
                    assert_eq!(map_clone.take_and_remove(&i), Some(i));
                }
            }));
        }

        for handle in wait_vec {
            handle.join().unwrap();
        }
        assert_eq!(map.len(), num_threads as usize * 100);
    }
}
