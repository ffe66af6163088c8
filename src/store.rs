//! The store: block-chain orchestration, rotation, and vacuum.
//!
//! ## Design
//!
//! Writes take an optimistic lock-free fast path into the current block; the
//! rotation lock serializes only the rare append of a new block, at most once
//! per window. Reads, removals and flushes never take a lock at all — they
//! resolve locations through the two concurrent indices and rely on per-key
//! atomicity of the bucket maps. Vacuum is single-flight behind its own
//! `try_lock` and is the only code that splices the chain or advances head.
//!
//! The rotation and vacuum locks are independent and never nested, so no
//! lock-ordering deadlock is possible.
//!
//! ## Consistency
//!
//! Range reads are bounded-staleness snapshots relative to a sampled command
//! time, not linearizable against writers in the same millisecond. Two items
//! with an identical expiry may be treated differently by a single cleanup
//! pass when vacuum interleaves. Both are deliberate throughput tradeoffs.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::block::{block_id_for, Block};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::{BlockLookupIndex, ItemLocationIndex};
use crate::item::Item;

/// In-memory, time-indexed keyed store.
///
/// Items are registered with an absolute expiry, queried by id or by time
/// range, explicitly deleted, and reclaimed lazily on read or in bulk by
/// [`vacuum`](Store::vacuum). Safe for arbitrary parallel callers.
///
/// # Example
///
/// ```
/// use tempora::{Config, Store};
///
/// let store: Store<String, String> = Store::new(Config::default());
/// store.add("session-1".into(), i64::MAX, "payload".into())?;
/// assert!(store.get(&"session-1".into())?.is_some());
/// # Ok::<(), tempora::Error>(())
/// ```
pub struct Store<K, V> {
    /// Oldest block still reachable for queries.
    head: RwLock<Arc<Block<K, V>>>,
    /// Newest, currently writable block: the tail of the chain.
    current: RwLock<Arc<Block<K, V>>>,
    item_index: ItemLocationIndex<K>,
    block_index: BlockLookupIndex<K, V>,
    /// Serializes block appends. `add` is the only operation that ever waits
    /// on another caller, and only when crossing a window boundary.
    rotation_lock: Mutex<()>,
    /// Single-flight guard for vacuum. Never waited on: busy means skip.
    vacuum_lock: Mutex<()>,
    config: Config,
    clock: Arc<dyn Clock>,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a store on the system clock.
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store with an injected clock.
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        let init = Arc::new(Block::new(&config, Arc::clone(&clock)));
        let block_index = BlockLookupIndex::new();
        block_index.publish(Arc::clone(&init));

        Self {
            head: RwLock::new(Arc::clone(&init)),
            current: RwLock::new(init),
            item_index: ItemLocationIndex::new(),
            block_index,
            rotation_lock: Mutex::new(()),
            vacuum_lock: Mutex::new(()),
            config,
            clock,
        }
    }

    /// Register `id` with an absolute expiry and payload.
    ///
    /// Fast path: when the sampled "now" still falls inside the current
    /// block's window, the write goes straight in with no locking — the
    /// common case, since a window spans the full configured block size.
    /// Slow path: wait (bounded) for the rotation lock, re-check, and rotate
    /// if still needed.
    ///
    /// # Errors
    ///
    /// [`Error::Overload`] when the rotation lock could not be acquired
    /// within the configured threshold. That is backpressure: the store
    /// never retries internally.
    pub fn add(&self, id: K, expiry_millis: i64, payload: V) -> Result<()> {
        if self.try_fast_add(&id, expiry_millis, &payload) {
            return Ok(());
        }

        // Time moved past the current window: serialize the append.
        let waited_ms = self.config.rotation_lock_timeout_ms;
        let Some(_guard) = self
            .rotation_lock
            .try_lock_for(Duration::from_millis(waited_ms))
        else {
            warn!(waited_ms, "rotation lock wait exceeded threshold, rejecting add");
            return Err(Error::Overload { waited_ms });
        };

        // Another thread may have rotated while we waited.
        if self.try_fast_add(&id, expiry_millis, &payload) {
            return Ok(());
        }

        let block = self.rotate();

        // Force-write at the new block's generation time, not the stale
        // "now" sample: a write sampled between the old window's close and
        // the new block's construction would otherwise belong to neither.
        self.item_index.register(id.clone(), block.block_gen());
        block.add(id, block.block_gen(), expiry_millis, payload);
        Ok(())
    }

    /// Optimistic write into the current block. Index first, then bucket.
    fn try_fast_add(&self, id: &K, expiry_millis: i64, payload: &V) -> bool {
        // Copy the reference, then sample: the block must be judged against
        // a registration time taken after we know which block we target.
        let target = self.current.read().clone();
        let register_time = self.clock.now_millis();

        if target.is_good_for(register_time) {
            self.item_index.register(id.clone(), register_time);
            target.add(id.clone(), register_time, expiry_millis, payload.clone());
            return true;
        }

        assert!(
            target.block_start() <= register_time,
            "current block is ahead of the clock"
        );
        false
    }

    /// Append a fresh block and advance `current`. Caller holds the rotation
    /// lock.
    fn rotate(&self) -> Arc<Block<K, V>> {
        let block = Arc::new(Block::new(&self.config, Arc::clone(&self.clock)));
        let mut current = self.current.write();
        current.link_next(Arc::clone(&block));
        *current = Arc::clone(&block);
        self.block_index.publish(Arc::clone(&block));
        debug!(block_id = block.block_id(), "rotated block chain tail");
        block
    }

    /// Remove the entry for `id`. Idempotent: a missing id is a no-op.
    pub fn remove(&self, id: &K) -> Result<()> {
        let Some(register_time) = self.item_index.deregister(id) else {
            return Ok(());
        };
        let block_id = block_id_for(register_time, self.config.block_size_ms);
        if let Some(block) = self.block_index.lookup(block_id) {
            block.remove_by_time(id, register_time);
        }
        // A vacuumed-away block means the item is already gone.
        Ok(())
    }

    /// Look up a single item by id.
    ///
    /// A stale index entry — the block vacuumed away, the item raced away,
    /// or the item expired — is deregistered on the spot (self-healing) and
    /// reported as `None`.
    pub fn get(&self, id: &K) -> Result<Option<Item<K, V>>> {
        let Some(register_time) = self.item_index.resolve(id) else {
            return Ok(None);
        };

        let block_id = block_id_for(register_time, self.config.block_size_ms);
        let Some(block) = self.block_index.lookup(block_id) else {
            self.item_index.deregister_stale(id, register_time);
            return Ok(None);
        };

        match block.get_one(id, register_time) {
            Some(item) => Ok(Some(item)),
            None => {
                self.item_index.deregister_stale(id, register_time);
                Ok(None)
            }
        }
    }

    /// Items registered in `[start_millis, end_millis]` that are live as of
    /// the read's command time. Order is unspecified.
    pub fn get_range(&self, start_millis: i64, end_millis: i64) -> Result<Vec<Item<K, V>>> {
        let mut result = Vec::new();
        self.range_walk(start_millis, end_millis, |block, start, end, command_time| {
            result.extend(block.get_range(start, end, command_time));
        });
        Ok(result)
    }

    /// [`get_range`](Store::get_range) that additionally sweeps items whose
    /// expiry has passed on the wall clock, from both buckets and the item
    /// index.
    ///
    /// Inclusion is still judged against the command time, so an item
    /// expiring between the two clock reads is returned one last time and
    /// deleted in the same pass.
    pub fn get_range_and_clean(
        &self,
        start_millis: i64,
        end_millis: i64,
    ) -> Result<Vec<Item<K, V>>> {
        let mut result = Vec::new();
        self.range_walk(start_millis, end_millis, |block, start, end, command_time| {
            result.extend(block.get_range_and_clean(start, end, command_time, &self.item_index));
        });
        Ok(result)
    }

    /// Destructively delete everything [`get_range`](Store::get_range) would
    /// return for the same range at the same command time.
    pub fn flush(&self, start_millis: i64, end_millis: i64) -> Result<()> {
        self.range_walk(start_millis, end_millis, |block, start, end, command_time| {
            block.flush(start, end, command_time, &self.item_index);
        });
        Ok(())
    }

    /// Shared range resolution: clamp the frame, anchor through the block
    /// index, then walk forward links (which already skip vacuumed gaps),
    /// visiting every non-obsolete block in range.
    fn range_walk<F>(&self, start_millis: i64, end_millis: i64, mut visit: F)
    where
        F: FnMut(&Arc<Block<K, V>>, i64, i64, i64),
    {
        let command_time = self.clock.now_millis();

        // No value in querying past "now" or before retained history.
        let end = end_millis.min(command_time);
        let start = start_millis.max(self.head.read().block_start());

        let start_id = block_id_for(start, self.config.block_size_ms);
        let end_id = block_id_for(end, self.config.block_size_ms);

        let mut cursor = self.block_index.first_in_range(start_id, end_id);
        while let Some(block) = cursor {
            if block.block_id() > end_id {
                break;
            }
            if !block.is_obsolete() {
                visit(&block, start, end, command_time);
            }
            cursor = block.next();
        }
    }

    /// Sweep expired items from aged blocks and reclaim the blocks that
    /// empty out. Returns the number of blocks structurally reclaimed.
    ///
    /// Single-flight: a concurrent call that cannot take the vacuum lock
    /// returns 0 immediately, never blocks. The walk starts two blocks past
    /// head and always stays at least two blocks short of `current`, so the
    /// mutable end of the chain is never touched; head itself is re-evaluated
    /// separately under the same margin.
    pub fn vacuum(&self) -> usize {
        let Some(_guard) = self.vacuum_lock.try_lock() else {
            return 0;
        };

        let mut reclaimed = 0;

        let head = self.head.read().clone();
        // Head and its immediate successor stay out of the walk.
        let Some(mut prev) = head.next() else {
            return 0;
        };
        if prev.next().is_none() {
            return 0;
        }

        loop {
            let Some(target) = prev.next() else { break };
            let Some(after) = target.next() else { break };
            if after.block_id() == self.current.read().block_id() {
                break;
            }
            // Blocks are time-ordered: one unripe block means nothing
            // further out qualifies either.
            if !target.is_vacuumable() {
                break;
            }

            target.vacuum_sweep(&self.item_index);
            if target.is_obsolete() {
                self.block_index.prune(target.block_id());
                prev.link_next(after);
                reclaimed += 1;
            } else {
                prev = target;
            }
        }

        // Now the head itself, under the same safety margin.
        let head = self.head.read().clone();
        if let Some(second) = head.next() {
            let keeps_margin = second
                .next()
                .map(|third| third.block_id() != self.current.read().block_id())
                .unwrap_or(false);
            if keeps_margin && head.is_vacuumable() {
                head.vacuum_sweep(&self.item_index);
                if head.is_obsolete() {
                    self.block_index.prune(head.block_id());
                    *self.head.write() = second;
                    reclaimed += 1;
                }
            }
        }

        if reclaimed > 0 {
            debug!(reclaimed, "vacuum reclaimed blocks");
        }
        reclaimed
    }

    /// Number of tracked items (live index entries).
    pub fn len(&self) -> usize {
        self.item_index.len()
    }

    /// Whether the store tracks no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live blocks in the lookup index.
    pub fn block_count(&self) -> usize {
        self.block_index.len()
    }

    /// Block ids along the chain from head to tail. Diagnostic: the ids are
    /// strictly increasing whenever the chain is healthy.
    pub fn chain_block_ids(&self) -> Vec<i64> {
        let mut ids = Vec::new();
        let mut cursor = Some(self.head.read().clone());
        while let Some(block) = cursor {
            ids.push(block.block_id());
            cursor = block.next();
        }
        ids
    }
}

impl<K, V> fmt::Debug for Store<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("items", &self.len())
            .field("blocks", &self.block_count())
            .field("head", &self.head.read().block_id())
            .field("current", &self.current.read().block_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn test_config() -> Config {
        Config::default()
            .with_block_size_ms(100)
            .with_vacuum_delay_ms(200)
            .with_vacuum_delay_blocks(2)
    }

    fn store_at(now: i64) -> (Arc<ManualClock>, Store<&'static str, u32>) {
        let clock = Arc::new(ManualClock::new(now));
        let store = Store::with_clock(test_config(), clock.clone());
        (clock, store)
    }

    #[test]
    fn starts_with_one_block() {
        let (_, store) = store_at(50);
        assert_eq!(store.block_count(), 1);
        assert_eq!(store.chain_block_ids(), vec![0]);
        assert!(store.is_empty());
    }

    #[test]
    fn fast_path_add_and_get() {
        let (_, store) = store_at(50);
        store.add("a", 99_999, 1).unwrap();
        let item = store.get(&"a").unwrap().unwrap();
        assert_eq!(*item.id(), "a");
        assert_eq!(*item.payload(), 1);
        assert_eq!(item.register_time(), 50);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn crossing_the_window_rotates() {
        let (clock, store) = store_at(50);
        store.add("a", 99_999, 1).unwrap();

        clock.set(260);
        store.add("b", 99_999, 2).unwrap();

        assert_eq!(store.block_count(), 2);
        assert_eq!(store.chain_block_ids(), vec![0, 2]);

        // the rotated write registers at the new block's generation time
        let item = store.get(&"b").unwrap().unwrap();
        assert_eq!(item.register_time(), 260);
    }

    #[test]
    fn remove_is_idempotent() {
        let (_, store) = store_at(50);
        store.add("a", 99_999, 1).unwrap();

        store.remove(&"a").unwrap();
        assert!(store.get(&"a").unwrap().is_none());
        assert_eq!(store.len(), 0);

        // second remove is a quiet no-op
        store.remove(&"a").unwrap();
    }

    #[test]
    fn expired_get_heals_the_index() {
        let (clock, store) = store_at(50);
        store.add("a", 80, 1).unwrap();
        assert_eq!(store.len(), 1);

        clock.set(120);
        assert!(store.get(&"a").unwrap().is_none());
        assert_eq!(store.len(), 0, "stale index entry should be deregistered");
    }

    #[test]
    fn range_walk_spans_blocks_and_skips_gaps() {
        let (clock, store) = store_at(50);
        store.add("a", 99_999, 1).unwrap();
        clock.set(150);
        store.add("b", 99_999, 2).unwrap();
        clock.set(450);
        store.add("c", 99_999, 3).unwrap();

        // chain has blocks 0, 1, 4; the probe crosses the 2..=3 gap
        assert_eq!(store.chain_block_ids(), vec![0, 1, 4]);
        let all = store.get_range(i64::MIN, i64::MAX).unwrap();
        assert_eq!(all.len(), 3);

        let first_two = store.get_range(0, 199).unwrap();
        assert_eq!(first_two.len(), 2);
    }

    #[test]
    fn flush_matches_get_range() {
        let (clock, store) = store_at(50);
        store.add("a", 99_999, 1).unwrap();
        clock.set(150);
        store.add("b", 99_999, 2).unwrap();
        clock.set(250);
        store.add("c", 99_999, 3).unwrap();

        store.flush(0, 199).unwrap();

        assert!(store.get(&"a").unwrap().is_none());
        assert!(store.get(&"b").unwrap().is_none());
        assert!(store.get(&"c").unwrap().is_some());
        let rest = store.get_range(i64::MIN, i64::MAX).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(*rest[0].id(), "c");
    }

    #[test]
    fn range_clamps_to_command_time() {
        let (_, store) = store_at(50);
        store.add("a", 99_999, 1).unwrap();
        // an end far in the future clamps to "now" without complaint
        let items = store.get_range(0, i64::MAX).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn debug_reports_shape() {
        let (_, store) = store_at(50);
        store.add("a", 99_999, 1).unwrap();
        let repr = format!("{:?}", store);
        assert!(repr.contains("Store"));
        assert!(repr.contains("items"));
    }
}
