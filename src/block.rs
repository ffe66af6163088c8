//! A fixed time-window container of items, subdivided into per-millisecond
//! buckets.
//!
//! ## Design
//!
//! A block's identity (`block_id`) and window (`block_start..=block_end`) are
//! derived from the clock at construction and never change. Its only mutable
//! state moves monotonically: the forward link goes unset → set and is never
//! cleared (vacuum may repoint it further down the chain, never backwards or
//! to nothing), and the obsolete flag goes false → true exactly once. Any
//! reader holding a stale block reference therefore sees self-consistent,
//! merely possibly-stale, data — never corruption.
//!
//! ## Thread safety
//!
//! Buckets are `DashMap`s: any number of concurrent writers and readers plus
//! at most one vacuum walker are safe. Chain mutation (`link_next`) must be
//! serialized externally by the store's rotation or vacuum lock.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::clock::Clock;
use crate::config::Config;
use crate::index::{FxBuild, ItemLocationIndex};
use crate::item::Item;

/// Block id owning `time`: integer division by the block width.
pub(crate) fn block_id_for(time: i64, block_size: i64) -> i64 {
    time.div_euclid(block_size)
}

/// First millisecond of a block's window.
pub(crate) fn block_start_for(block_id: i64, block_size: i64) -> i64 {
    block_id * block_size
}

/// Last millisecond of a block's window.
pub(crate) fn block_end_for(block_id: i64, block_size: i64) -> i64 {
    (block_id + 1) * block_size - 1
}

/// One fixed time window of storage.
pub(crate) struct Block<K, V> {
    block_id: i64,
    block_start: i64,
    block_end: i64,
    /// Clock reading at construction. The registration time for the write
    /// that forced this block into existence.
    block_gen: i64,
    /// Absolute time after which vacuum may sweep this block.
    vacuumable_after: i64,
    block_size: i64,
    /// One bucket per millisecond of the window; allocated once, never
    /// replaced.
    buckets: Vec<DashMap<K, Item<K, V>, FxBuild>>,
    /// Forward link. Unset → set exactly once by rotation; vacuum may later
    /// repoint it past spliced-out blocks, always under the vacuum lock.
    next: RwLock<Option<Arc<Block<K, V>>>>,
    /// Terminal flag: an obsolete block is excluded from reads. A reader
    /// already mid-traversal may legitimately observe it once more.
    obsolete: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl<K, V> Block<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Build the block owning the current clock time.
    pub(crate) fn new(config: &Config, clock: Arc<dyn Clock>) -> Self {
        assert!(config.block_size_ms > 0, "block size must be positive");

        let block_size = config.block_size_ms;
        let block_gen = clock.now_millis();
        let block_id = block_id_for(block_gen, block_size);
        let block_start = block_start_for(block_id, block_size);
        let block_end = block_end_for(block_id, block_size);
        let vacuumable_after = block_end + config.effective_vacuum_delay_ms();

        let buckets = (0..block_size)
            .map(|_| DashMap::with_hasher(FxBuild::default()))
            .collect();

        Self {
            block_id,
            block_start,
            block_end,
            block_gen,
            vacuumable_after,
            block_size,
            buckets,
            next: RwLock::new(None),
            obsolete: AtomicBool::new(false),
            clock,
        }
    }

    pub(crate) fn block_id(&self) -> i64 {
        self.block_id
    }

    pub(crate) fn block_start(&self) -> i64 {
        self.block_start
    }

    pub(crate) fn block_end(&self) -> i64 {
        self.block_end
    }

    /// Generation time, used as the forced registration time for the write
    /// that triggered rotation.
    pub(crate) fn block_gen(&self) -> i64 {
        self.block_gen
    }

    pub(crate) fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }

    fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    /// Next block in the chain, if any.
    pub(crate) fn next(&self) -> Option<Arc<Block<K, V>>> {
        self.next.read().clone()
    }

    /// Set or repoint the forward link.
    ///
    /// The caller must hold the rotation lock (append) or the vacuum lock
    /// (splice). The `Arc` signature makes a null target unrepresentable.
    pub(crate) fn link_next(&self, next: Arc<Block<K, V>>) {
        *self.next.write() = Some(next);
    }

    /// Does `register_time` fall inside this block's window?
    pub(crate) fn is_good_for(&self, register_time: i64) -> bool {
        register_time >= self.block_start && register_time <= self.block_end
    }

    /// Delay passed and a next block exists. The tail is never vacuumable.
    pub(crate) fn is_vacuumable(&self) -> bool {
        self.clock.now_millis() > self.vacuumable_after && self.next.read().is_some()
    }

    /// Bucket owning `register_time`. Only meaningful for times inside the
    /// window.
    fn bucket_index(&self, register_time: i64) -> usize {
        register_time.rem_euclid(self.block_size) as usize
    }

    /// Insert an item at `register_time`.
    ///
    /// The caller must already have matched the registration time to this
    /// block. An existing entry for the same id in the same bucket is
    /// overwritten: last write wins, duplicate ids within a bucket are not a
    /// thing.
    ///
    /// # Panics
    ///
    /// Panics if `register_time` is outside the block's window. That is an
    /// invariant violation in rotation/addressing logic, not a caller input
    /// problem.
    pub(crate) fn add(&self, id: K, register_time: i64, expiry: i64, payload: V) {
        assert!(
            self.is_good_for(register_time),
            "registration time {} outside block window [{}, {}]",
            register_time,
            self.block_start,
            self.block_end
        );

        self.buckets[self.bucket_index(register_time)].insert(
            id.clone(),
            Item::new(id, register_time, expiry, payload),
        );
    }

    /// O(1) bucket deletion. No-op on an obsolete block.
    ///
    /// Returns whether an entry was found. The caller owns any item-location
    /// index cleanup.
    pub(crate) fn remove_by_time(&self, id: &K, register_time: i64) -> bool {
        if self.is_obsolete() {
            return false;
        }
        self.buckets[self.bucket_index(register_time)]
            .remove(id)
            .is_some()
    }

    /// Fallback removal when no timestamp hint exists: linear scan across
    /// all buckets, stopping at the first match. Duplicate ids across blocks
    /// are not a supported scenario.
    // no store-level caller: removal always resolves a registration time
    // through the item index first
    #[allow(dead_code)]
    pub(crate) fn remove_by_scan(&self, id: &K) -> bool {
        if self.is_obsolete() {
            return false;
        }
        self.buckets.iter().any(|bucket| bucket.remove(id).is_some())
    }

    /// Direct bucket lookup by id and registration time.
    ///
    /// A hit that is already past its expiry is deleted in place and
    /// reported as not-found (self-cleaning read).
    pub(crate) fn get_one(&self, id: &K, register_time: i64) -> Option<Item<K, V>> {
        if self.is_obsolete() {
            return None;
        }

        let bucket = &self.buckets[self.bucket_index(register_time)];
        let item = bucket.get(id).map(|entry| entry.value().clone())?;

        let now = self.clock.now_millis();
        if item.expiry_millis() < now {
            // Guard on expiry so a same-millisecond rewrite racing us stays put
            bucket.remove_if(id, |_, it| it.expiry_millis() < now);
            return None;
        }

        Some(item)
    }

    /// Clip a query frame to this block, bounded above by the command time.
    ///
    /// `None` when the block is obsolete, the range is inverted, or it does
    /// not overlap the window.
    fn clip(&self, start: i64, end: i64, command_time: i64) -> Option<(i64, i64)> {
        if self.is_obsolete() || start > end || start > self.block_end || end < self.block_start {
            return None;
        }
        let lo = self.block_start.max(start);
        let hi = self.block_end.min(end.min(command_time));
        (lo <= hi).then_some((lo, hi))
    }

    /// Items registered in `[start, end]` that are live as of `command_time`.
    ///
    /// Inclusion is judged against the sampled command time, not the wall
    /// clock, so the result is a consistent snapshot as of `command_time`.
    /// No side effects.
    pub(crate) fn get_range(&self, start: i64, end: i64, command_time: i64) -> Vec<Item<K, V>> {
        let Some((lo, hi)) = self.clip(start, end, command_time) else {
            return Vec::new();
        };

        let mut result = Vec::new();
        for i in self.bucket_index(lo)..=self.bucket_index(hi) {
            for entry in self.buckets[i].iter() {
                if entry.value().expiry_millis() >= command_time {
                    result.push(entry.value().clone());
                }
            }
        }
        result
    }

    /// [`get_range`](Self::get_range) plus an opportunistic sweep.
    ///
    /// Inclusion still uses `command_time`; cleanup uses the wall clock. An
    /// item whose expiry falls between the two is returned *and* deleted
    /// (bucket + caller's global index) in the same pass. Two items with an
    /// identical expiry can be treated differently if vacuum interleaves;
    /// that weak-consistency window is accepted by design.
    pub(crate) fn get_range_and_clean(
        &self,
        start: i64,
        end: i64,
        command_time: i64,
        index: &ItemLocationIndex<K>,
    ) -> Vec<Item<K, V>> {
        let Some((lo, hi)) = self.clip(start, end, command_time) else {
            return Vec::new();
        };

        let now = self.clock.now_millis();
        let mut result = Vec::new();
        for i in self.bucket_index(lo)..=self.bucket_index(hi) {
            let bucket = &self.buckets[i];

            let mut expired: Vec<(K, i64)> = Vec::new();
            for entry in bucket.iter() {
                let item = entry.value();
                if item.expiry_millis() >= command_time {
                    result.push(item.clone());
                }
                if item.expiry_millis() < now {
                    expired.push((entry.key().clone(), item.register_time()));
                }
            }

            // Removals happen outside the iteration: DashMap shard locks are
            // not reentrant.
            for (id, register_time) in expired {
                bucket.remove_if(&id, |_, it| it.expiry_millis() < now);
                index.deregister_stale(&id, register_time);
            }
        }
        result
    }

    /// Destructively delete everything registered in `[start, end]` up to
    /// `command_time`, from both the buckets and the caller's global index.
    ///
    /// Buckets are cleared in descending time order so the end of the range
    /// — where a write racing the flush near "now" would land — is emptied
    /// first.
    pub(crate) fn flush(
        &self,
        start: i64,
        end: i64,
        command_time: i64,
        index: &ItemLocationIndex<K>,
    ) {
        let Some((lo, hi)) = self.clip(start, end, command_time) else {
            return;
        };

        for i in (self.bucket_index(lo)..=self.bucket_index(hi)).rev() {
            let bucket = &self.buckets[i];
            // Every entry in bucket i carries the same registration
            // millisecond: the window start plus the bucket offset.
            let bucket_time = self.block_start + i as i64;

            let ids: Vec<K> = bucket.iter().map(|entry| entry.key().clone()).collect();
            for id in ids {
                index.deregister_stale(&id, bucket_time);
                bucket.remove(&id);
            }
        }
    }

    /// Sweep expired items out of every bucket; mark the block obsolete if
    /// it ends up fully empty.
    ///
    /// The caller must serialize invocation (the store's vacuum lock). A
    /// stray double-call wastes work but never corrupts data. Returns
    /// whether a sweep actually ran: `false` when the block is not yet
    /// vacuumable or is the tail.
    pub(crate) fn vacuum_sweep(&self, index: &ItemLocationIndex<K>) -> bool {
        if !self.is_vacuumable() {
            return false;
        }

        let now = self.clock.now_millis();
        let mut empty = true;

        for bucket in &self.buckets {
            bucket.retain(|id, item| {
                if now > item.expiry_millis() {
                    index.deregister_stale(id, item.register_time());
                    false
                } else {
                    empty = false;
                    true
                }
            });
        }

        if empty {
            self.mark_obsolete();
        }
        true
    }
}
