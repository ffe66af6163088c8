//! Convenient imports for tempora.
//!
//! ```
//! use tempora::prelude::*;
//!
//! let store: Store<u64, &str> = Store::new(Config::default());
//! ```

pub use crate::{Clock, Config, Error, Item, ItemRepository, ManualClock, Result, Store, SystemClock};
