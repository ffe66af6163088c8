//! Error types for tempora.
//!
//! The surface is deliberately small. `Overload` is the store's backpressure
//! signal: an `add` gave up waiting for the rotation lock and the caller
//! should back off. `Internal` is the generic failure channel required by the
//! repository contract. Invariant violations inside the engine itself
//! (an item addressed to the wrong block, a current block ahead of the clock)
//! are bugs, not errors, and panic instead.

use thiserror::Error;

/// All tempora errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The rotation-lock wait exceeded the configured threshold.
    ///
    /// The store never retries internally; the caller decides whether to
    /// back off and retry.
    #[error("timed out after {waited_ms}ms waiting for block rotation; store is overloaded")]
    Overload {
        /// How long the add waited before giving up, in milliseconds.
        waited_ms: u64,
    },

    /// Unexpected internal fault.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for tempora operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this is an overload rejection.
    pub fn is_overload(&self) -> bool {
        matches!(self, Error::Overload { .. })
    }

    /// Check if this error may succeed on retry.
    ///
    /// Overload is transient by definition; internal errors are not.
    pub fn is_retryable(&self) -> bool {
        self.is_overload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overload_is_retryable() {
        let err = Error::Overload { waited_ms: 100 };
        assert!(err.is_overload());
        assert!(err.is_retryable());
    }

    #[test]
    fn internal_is_not_retryable() {
        let err = Error::Internal("bad state".to_string());
        assert!(!err.is_overload());
        assert!(!err.is_retryable());
    }

    #[test]
    fn overload_display_names_the_wait() {
        let err = Error::Overload { waited_ms: 42 };
        assert!(err.to_string().contains("42ms"));
        assert!(err.to_string().contains("overloaded"));
    }
}
