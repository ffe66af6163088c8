//! The immutable record stored in a block bucket.

/// A stored record: id, registration time, absolute expiry, payload.
///
/// Items are created on write and never mutated. There is no update
/// operation anywhere in the store; changing a record means remove + add.
/// Readers receive clones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item<K, V> {
    id: K,
    register_time: i64,
    expiry: i64,
    payload: V,
}

impl<K, V> Item<K, V> {
    pub(crate) fn new(id: K, register_time: i64, expiry: i64, payload: V) -> Self {
        Self {
            id,
            register_time,
            expiry,
            payload,
        }
    }

    /// The item's id.
    pub fn id(&self) -> &K {
        &self.id
    }

    /// When the item was registered, in milliseconds. Fixes the item's
    /// block and bucket placement.
    pub fn register_time(&self) -> i64 {
        self.register_time
    }

    /// Absolute expiry in milliseconds.
    pub fn expiry_millis(&self) -> i64 {
        self.expiry
    }

    /// The stored payload.
    pub fn payload(&self) -> &V {
        &self.payload
    }

    /// Consume the item and take the payload.
    pub fn into_payload(self) -> V {
        self.payload
    }
}
