//! rimline-store: keyed document collections
//!
//! Harvesters upsert source records by natural key; matchers read them back
//! and write cross-reference fields. Two implementations share the
//! [`DocumentStore`] contract: [`MemoryStore`] and the durable [`JsonlStore`].

pub mod document;
pub mod jsonl;
pub mod memory;
pub mod store;

pub use document::{Document, Filter, Record, UpsertOutcome, get_path};
pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
pub use store::DocumentStore;
