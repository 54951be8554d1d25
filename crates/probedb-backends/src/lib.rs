//! probedb Backends - capability traits and instrumented proxies.
//!
//! Each capability module defines the operations a client of that kind of
//! store exposes, implements the trait for [`probedb_core::Instrumented`],
//! and provides a default operation classifier:
//!
//! - [`kv`]: Redis-like key-value commands
//! - [`document`]: MongoDB-like document commands
//! - [`relational`]: SQL statements, classified by keyword
//! - [`wide_column`]: DynamoDB-like actions and PartiQL statements
//!
//! [`memory`] holds in-process reference implementations and, with the
//! `sqlite` feature, [`sqlite::SqliteBackend`] runs real SQL.

pub mod document;
pub mod error;
pub mod kv;
pub mod memory;
pub mod relational;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod wide_column;

pub use document::{Document, DocumentBackend, FindOptions};
pub use error::MemoryError;
pub use kv::KeyValueBackend;
pub use memory::{MemoryDocumentStore, MemoryKeyValue, MemoryWideColumn};
pub use relational::{RelationalBackend, Rows, SqlValue};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
pub use wide_column::{AttributeValue, Item, KeySchema, WideColumnBackend};
