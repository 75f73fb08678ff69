//! The document store contract shared by harvesters and matchers

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::document::{Document, Filter, Record, UpsertOutcome};

/// Keyed, upsert-capable collection store.
///
/// Every write is a natural-key upsert, so concurrent harvesters writing the
/// same collection need no coordination beyond the store's own locking.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a secondary index on a dotted field path. Idempotent.
    async fn ensure_index(&self, collection: &str, field: &str) -> Result<()>;

    /// Fetch one document by natural key.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// All records whose `field` equals (or, for arrays, contains) `value`.
    async fn find_by_field(&self, collection: &str, field: &str, value: &str)
        -> Result<Vec<Record>>;

    /// Records matching `filter`, each reduced to `projection`.
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        projection: &[&str],
    ) -> Result<Vec<Record>>;

    /// All natural keys currently in `collection`.
    async fn keys(&self, collection: &str) -> Result<HashSet<String>>;

    /// Insert or merge each record by key.
    async fn upsert_many(&self, collection: &str, records: Vec<Record>) -> Result<UpsertOutcome>;

    /// Merge `fields` into an existing document. Returns false if the key is absent.
    async fn update_fields(&self, collection: &str, key: &str, fields: Document) -> Result<bool>;

    async fn count(&self, collection: &str) -> Result<usize>;

    /// Names of all non-empty collections.
    async fn collections(&self) -> Result<Vec<String>>;
}
