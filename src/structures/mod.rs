//! Concurrent maps the harness can probe.
//!
//! Every experiment talks to the map under test through [`ConcurrentMap`] and
//! nothing else. Two implementations ship with the crate: [`SlotMap`], a
//! lock-free table whose misses are served by atomic loads alone, and an
//! adapter for `dashmap::DashMap`, where every removal takes a shard lock.

pub use self::slot_map::{SlotMap, MAX_VALUE};

mod sharded;
mod slot_map;

/// The four operations the experiments invoke on a map under test.
///
/// Implementations must be linearizable for the linearizability experiment to
/// pass; the litmus harness additionally cares about which of these calls
/// perform a write internally.
pub trait ConcurrentMap<K, V>: Send + Sync {
    /// Store `value` under `key` unless a value is already present.
    ///
    /// Returns `Some(existing)` when the key was already present (the map is
    /// left untouched), `None` when `value` was inserted.
    fn insert_if_absent(&self, key: K, value: V) -> Option<V>;

    /// Remove the value stored under `key`, returning it if there was one.
    fn take_and_remove(&self, key: &K) -> Option<V>;

    fn load(&self, key: &K) -> Option<V>;

    /// Unconditionally store `value` under `key`.
    fn store(&self, key: K, value: V);
}
