//! The repository-style external interface.

use std::hash::Hash;

use crate::error::Result;
use crate::item::Item;
use crate::store::Store;

/// Repository surface over a keyed, expiring item store.
///
/// Every method is fallible by contract even where the in-memory engine has
/// nothing to fail on today; callers code against [`Result`] uniformly.
/// Maintenance operations (vacuum) are deliberately not part of this trait:
/// they belong to whoever owns the store, not to whoever uses it.
pub trait ItemRepository<K, V> {
    /// Register `id` with an absolute expiry (milliseconds) and payload.
    fn add(&self, id: K, expiry_millis: i64, payload: V) -> Result<()>;

    /// Remove the entry for `id`. Idempotent.
    fn remove(&self, id: &K) -> Result<()>;

    /// Single item by id, or `None`.
    fn get(&self, id: &K) -> Result<Option<Item<K, V>>>;

    /// Live items registered in `[start_millis, end_millis]`. Order is
    /// unspecified.
    fn get_range(&self, start_millis: i64, end_millis: i64) -> Result<Vec<Item<K, V>>>;

    /// Destructively delete items registered in `[start_millis, end_millis]`.
    fn flush(&self, start_millis: i64, end_millis: i64) -> Result<()>;
}

impl<K, V> ItemRepository<K, V> for Store<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn add(&self, id: K, expiry_millis: i64, payload: V) -> Result<()> {
        Store::add(self, id, expiry_millis, payload)
    }

    fn remove(&self, id: &K) -> Result<()> {
        Store::remove(self, id)
    }

    fn get(&self, id: &K) -> Result<Option<Item<K, V>>> {
        Store::get(self, id)
    }

    fn get_range(&self, start_millis: i64, end_millis: i64) -> Result<Vec<Item<K, V>>> {
        Store::get_range(self, start_millis, end_millis)
    }

    fn flush(&self, start_millis: i64, end_millis: i64) -> Result<()> {
        Store::flush(self, start_millis, end_millis)
    }
}
