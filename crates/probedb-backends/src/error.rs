//! Errors raised by the in-memory reference backends.

use thiserror::Error;

/// In-memory backend errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Key holds a value of a different kind.
    #[error("WRONGTYPE operation against a key holding the wrong kind of value")]
    WrongType,

    /// Stored value is not an integer, or the result overflowed.
    #[error("value is not an integer or out of range")]
    NotAnInteger,

    /// TTL too large to represent as a deadline.
    #[error("invalid expire time")]
    InvalidExpireTime,

    /// A document with the same `_id` already exists.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Collection already exists.
    #[error("collection already exists: {0}")]
    CollectionExists(String),

    /// Index does not exist.
    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// Update touched a field that cannot change.
    #[error("field is immutable: {0}")]
    ImmutableField(String),

    /// Table does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Table already exists.
    #[error("table already exists: {0}")]
    TableExists(String),

    /// Key attribute missing or not a scalar.
    #[error("missing key attribute: {0}")]
    MissingKey(String),

    /// Statement outside the supported subset.
    #[error("unsupported statement: {0}")]
    Unsupported(String),
}
