//! In-memory reference backends.
//!
//! These implement the capability traits without a network dependency and
//! back the CLI workload and the integration tests.

mod document;
mod kv;
mod wide_column;

pub use document::MemoryDocumentStore;
pub use kv::MemoryKeyValue;
pub use wide_column::MemoryWideColumn;
