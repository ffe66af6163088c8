//! # tempora
//!
//! In-memory, time-indexed keyed store for bounded-lifetime records.
//!
//! Callers register items under a unique id with an absolute expiry, query
//! them by id or by registration-time range, delete them explicitly, and run
//! a periodic [`vacuum`](Store::vacuum) pass that reclaims expired data and
//! the memory backing it. The design targets continuous high-rate writes and
//! reads — session tracking and similar workloads where data naturally ages
//! out.
//!
//! ## Storage layout
//!
//! Time is partitioned into fixed windows. Each window is a block holding
//! per-millisecond buckets; blocks form a singly linked, forward-only chain
//! from the oldest retained window (head) to the writable tail (current).
//! Two concurrent indices — item id → registration time, block id → block —
//! give O(1) point access, while range queries anchor through the block
//! index and then walk the chain.
//!
//! The common path is lock-free: the only blocking point in the whole store
//! is the bounded wait in [`Store::add`] for the rotation lock when time
//! crosses a window boundary, and the only failure that produces is the
//! explicit [`Error::Overload`] backpressure signal.
//!
//! ## Quick start
//!
//! ```
//! use tempora::{Clock, Config, Store, SystemClock};
//!
//! let store: Store<u64, String> = Store::new(Config::default());
//!
//! let expiry = SystemClock.now_millis() + 30_000;
//! store.add(42, expiry, "session state".into())?;
//!
//! let item = store.get(&42)?.expect("just added");
//! assert_eq!(item.payload(), "session state");
//!
//! store.remove(&42)?;
//! # Ok::<(), tempora::Error>(())
//! ```
//!
//! Expired items disappear lazily on read; a periodic driver should call
//! [`Store::vacuum`] to reclaim the blocks and index entries behind them.

#![warn(missing_docs)]

mod block;
mod clock;
mod config;
mod error;
mod index;
mod item;
mod repository;
mod store;

pub mod prelude;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use item::Item;
pub use repository::ItemRepository;
pub use store::Store;
