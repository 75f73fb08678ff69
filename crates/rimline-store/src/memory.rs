//! In-memory document store with per-field inverted indexes

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{
    Document, Filter, Record, UpsertOutcome, get_path, index_terms, merge_into, project,
};
use crate::store::DocumentStore;

#[derive(Debug, Default)]
struct Collection {
    docs: BTreeMap<String, Document>,
    /// field path -> term -> keys
    indexes: HashMap<String, HashMap<String, BTreeSet<String>>>,
}

impl Collection {
    fn index_doc(&mut self, key: &str) {
        let Some(doc) = self.docs.get(key) else {
            return;
        };
        for (field, index) in self.indexes.iter_mut() {
            if let Some(value) = get_path(doc, field) {
                for term in index_terms(value) {
                    index.entry(term).or_default().insert(key.to_string());
                }
            }
        }
    }

    fn unindex_doc(&mut self, key: &str) {
        let Some(doc) = self.docs.get(key) else {
            return;
        };
        for (field, index) in self.indexes.iter_mut() {
            if let Some(value) = get_path(doc, field) {
                for term in index_terms(value) {
                    if let Some(keys) = index.get_mut(&term) {
                        keys.remove(key);
                        if keys.is_empty() {
                            index.remove(&term);
                        }
                    }
                }
            }
        }
    }

    fn build_index(&mut self, field: &str) {
        let mut index: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (key, doc) in &self.docs {
            if let Some(value) = get_path(doc, field) {
                for term in index_terms(value) {
                    index.entry(term).or_default().insert(key.clone());
                }
            }
        }
        self.indexes.insert(field.to_string(), index);
    }

    /// Merge one record; true if the key is new.
    fn upsert(&mut self, record: Record) -> bool {
        self.unindex_doc(&record.key);
        let inserted = match self.docs.get_mut(&record.key) {
            Some(existing) => {
                merge_into(existing, record.doc);
                false
            }
            None => {
                let mut doc = Document::new();
                merge_into(&mut doc, record.doc);
                self.docs.insert(record.key.clone(), doc);
                true
            }
        };
        self.index_doc(&record.key);
        inserted
    }
}

/// Document store held entirely in memory.
///
/// Used directly in tests and as the working set behind [`JsonlStore`](crate::JsonlStore).
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current document for `key` after a write, for write-through persistence.
    pub(crate) async fn snapshot(&self, collection: &str, key: &str) -> Option<Document> {
        let guard = self.collections.read().await;
        guard.get(collection)?.docs.get(key).cloned()
    }

    /// Load a record without merge semantics (later loads replace earlier ones).
    pub(crate) async fn load_replace(&self, collection: &str, record: Record) {
        let mut guard = self.collections.write().await;
        let coll = guard.entry(collection.to_string()).or_default();
        coll.unindex_doc(&record.key);
        coll.docs.insert(record.key.clone(), record.doc);
        coll.index_doc(&record.key);
    }

    pub(crate) async fn all_records(&self, collection: &str) -> Vec<Record> {
        let guard = self.collections.read().await;
        guard
            .get(collection)
            .map(|c| {
                c.docs
                    .iter()
                    .map(|(k, d)| Record::new(k.clone(), d.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ensure_index(&self, collection: &str, field: &str) -> Result<()> {
        let mut guard = self.collections.write().await;
        let coll = guard.entry(collection.to_string()).or_default();
        if !coll.indexes.contains_key(field) {
            coll.build_index(field);
            log::debug!("index created: {collection}.{field}");
        }
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        Ok(self.snapshot(collection, key).await)
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Record>> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        if let Some(index) = coll.indexes.get(field) {
            let records: Vec<Record> = index
                .get(value)
                .map(|keys| {
                    keys.iter()
                        .filter_map(|k| coll.docs.get(k).map(|d| Record::new(k.clone(), d.clone())))
                        .collect()
                })
                .unwrap_or_default();
            return Ok(records);
        }
        Ok(coll
            .docs
            .iter()
            .filter(|(_, d)| {
                get_path(d, field).is_some_and(|v| index_terms(v).iter().any(|t| t == value))
            })
            .map(|(k, d)| Record::new(k.clone(), d.clone()))
            .collect())
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        projection: &[&str],
    ) -> Result<Vec<Record>> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(coll
            .docs
            .iter()
            .filter(|(_, d)| filter.matches(d))
            .map(|(k, d)| Record::new(k.clone(), project(d, projection)))
            .collect())
    }

    async fn keys(&self, collection: &str) -> Result<HashSet<String>> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .map(|c| c.docs.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_many(&self, collection: &str, records: Vec<Record>) -> Result<UpsertOutcome> {
        let mut guard = self.collections.write().await;
        let coll = guard.entry(collection.to_string()).or_default();
        let mut outcome = UpsertOutcome::default();
        for record in records {
            if coll.upsert(record) {
                outcome.inserted += 1;
            } else {
                outcome.updated += 1;
            }
        }
        Ok(outcome)
    }

    async fn update_fields(&self, collection: &str, key: &str, fields: Document) -> Result<bool> {
        let mut guard = self.collections.write().await;
        let Some(coll) = guard.get_mut(collection) else {
            return Ok(false);
        };
        if !coll.docs.contains_key(key) {
            return Ok(false);
        }
        coll.upsert(Record::new(key, fields));
        Ok(true)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let guard = self.collections.read().await;
        Ok(guard.get(collection).map_or(0, |c| c.docs.len()))
    }

    async fn collections(&self) -> Result<Vec<String>> {
        let guard = self.collections.read().await;
        let mut names: Vec<String> = guard
            .iter()
            .filter(|(_, c)| !c.docs.is_empty())
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}
