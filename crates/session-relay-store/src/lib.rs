//! Metadata storage for the session relay.
//!
//! Provides:
//! - `MetadataStore` - CRUD over session and event records
//! - Storage implementations (memory)
//!
//! Records here are an audit/UI concern only; live command routing never
//! reads them.

pub mod record;
pub mod storage;

pub use record::{EventFilter, MetadataStore, Record, StoreError};

#[cfg(feature = "memory")]
pub use storage::MemoryStore;
