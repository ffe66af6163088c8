//! The two auxiliary indices: item-location and block-lookup.
//!
//! Both are thin domain wrappers over `DashMap` with `FxHasher`
//! (lock-free reads, sharded writes, fast non-crypto hashing). Neither takes
//! any extra locking: every operation relies on the per-key atomicity of the
//! underlying map.

use std::hash::{BuildHasherDefault, Hash};
use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHasher;

use crate::block::Block;

pub(crate) type FxBuild = BuildHasherDefault<FxHasher>;

/// Map from item id to registration time.
///
/// The value is deliberately the registration timestamp and nothing else —
/// never a block or item reference. The timestamp alone pins down the owning
/// block (`time / block_size`) and bucket (`time % block_size`), and the
/// index never has to be rewritten when vacuum splices blocks out of the
/// chain.
pub(crate) struct ItemLocationIndex<K> {
    entries: DashMap<K, i64, FxBuild>,
}

impl<K: Eq + Hash + Clone> ItemLocationIndex<K> {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::with_hasher(FxBuild::default()),
        }
    }

    /// Point `id` at `register_time`, replacing any previous location.
    pub(crate) fn register(&self, id: K, register_time: i64) {
        self.entries.insert(id, register_time);
    }

    /// Registration time for `id`, if tracked.
    pub(crate) fn resolve(&self, id: &K) -> Option<i64> {
        self.entries.get(id).map(|entry| *entry.value())
    }

    /// Atomically pop the entry for `id`, returning its registration time.
    pub(crate) fn deregister(&self, id: &K) -> Option<i64> {
        self.entries.remove(id).map(|(_, time)| time)
    }

    /// Drop the entry for `id` only if it still points at `register_time`.
    ///
    /// Expiry-driven cleanup goes through this guard so that a concurrent
    /// re-add of the same id — which repointed the index at a newer block —
    /// is never orphaned by a sweep of the old copy.
    pub(crate) fn deregister_stale(&self, id: &K, register_time: i64) {
        self.entries.remove_if(id, |_, time| *time == register_time);
    }

    /// Number of tracked items.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Map from block id to the block itself, pruned as vacuum reclaims blocks.
pub(crate) struct BlockLookupIndex<K, V> {
    blocks: DashMap<i64, Arc<Block<K, V>>, FxBuild>,
}

impl<K: Eq + Hash + Clone, V: Clone> BlockLookupIndex<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            blocks: DashMap::with_hasher(FxBuild::default()),
        }
    }

    /// Make a block reachable by id.
    pub(crate) fn publish(&self, block: Arc<Block<K, V>>) {
        self.blocks.insert(block.block_id(), block);
    }

    /// Block with the given id, if still alive.
    pub(crate) fn lookup(&self, block_id: i64) -> Option<Arc<Block<K, V>>> {
        self.blocks.get(&block_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop a reclaimed block from the index.
    pub(crate) fn prune(&self, block_id: i64) {
        self.blocks.remove(&block_id);
    }

    /// Oldest existing block in `[start_id, end_id]`, found by direct probes.
    ///
    /// Probing ids that vacuum already reclaimed is expected and cheap; the
    /// first hit anchors a chain traversal, which then skips any further
    /// gaps by itself.
    pub(crate) fn first_in_range(&self, start_id: i64, end_id: i64) -> Option<Arc<Block<K, V>>> {
        (start_id..=end_id).find_map(|id| self.lookup(id))
    }

    /// Number of live blocks.
    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }
}
