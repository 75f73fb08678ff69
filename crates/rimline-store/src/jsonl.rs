//! Append-only JSON-lines document store
//!
//! Layout:
//! ```text
//! {dir}/
//! ├── works.jsonl      # one {"key", "doc"} line per write; later lines win
//! ├── authors.jsonl
//! └── ...
//! ```
//!
//! Every write appends the full post-merge document, so a batch is durable
//! once `upsert_many` returns. Superseded lines are compacted on open through
//! a `.tmp` file and an atomic rename.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::document::{Document, Filter, Record, UpsertOutcome};
use crate::memory::MemoryStore;
use crate::store::DocumentStore;

const EXTENSION: &str = "jsonl";

#[derive(Serialize, Deserialize)]
struct Line {
    key: String,
    doc: Document,
}

/// Durable document store backed by one JSON-lines file per collection.
pub struct JsonlStore {
    dir: PathBuf,
    inner: MemoryStore,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for JsonlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl JsonlStore {
    /// Open (or create) a store rooted at `dir`, replaying every collection file.
    pub async fn open(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create store dir: {}", dir.display()))?;

        let store = Self {
            dir: dir.to_path_buf(),
            inner: MemoryStore::new(),
            write_lock: Mutex::new(()),
        };

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("failed to read store dir: {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.ends_with(".tmp") {
                log::debug!("removing stale tmp file: {}", path.display());
                tokio::fs::remove_file(&path).await?;
                continue;
            }
            if path.extension().is_some_and(|ext| ext == EXTENSION) {
                if let Some(collection) = path.file_stem().and_then(|s| s.to_str()) {
                    store.replay(collection, &path).await?;
                }
            }
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn collection_path(&self, collection: &str) -> Result<PathBuf> {
        anyhow::ensure!(
            !collection.is_empty()
                && collection
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
            "invalid collection name: {collection:?}"
        );
        Ok(self.dir.join(format!("{collection}.{EXTENSION}")))
    }

    async fn replay(&self, collection: &str, path: &Path) -> Result<()> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let mut lines = 0usize;
        let mut bad = 0usize;
        for (lineno, raw) in content.lines().enumerate() {
            if raw.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Line>(raw) {
                Ok(line) => {
                    lines += 1;
                    self.inner
                        .load_replace(collection, Record::new(line.key, line.doc))
                        .await;
                }
                Err(e) => {
                    bad += 1;
                    log::warn!("{}:{}: skipping corrupt line: {e}", path.display(), lineno + 1);
                }
            }
        }

        let distinct = self.inner.count(collection).await?;
        log::debug!("{collection}: {distinct} documents from {lines} lines");
        if bad > 0 || lines > distinct {
            self.compact(collection).await?;
        }
        Ok(())
    }

    /// Rewrite a collection file with exactly one line per key.
    pub async fn compact(&self, collection: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let final_path = self.collection_path(collection)?;
        let tmp_path = final_path.with_extension(format!("{EXTENSION}.tmp"));

        let mut buf = Vec::new();
        for record in self.inner.all_records(collection).await {
            serde_json::to_writer(
                &mut buf,
                &Line {
                    key: record.key,
                    doc: record.doc,
                },
            )?;
            buf.push(b'\n');
        }
        tokio::fs::write(&tmp_path, &buf)
            .await
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .with_context(|| {
                format!(
                    "failed to rename {} → {}",
                    tmp_path.display(),
                    final_path.display()
                )
            })?;
        log::debug!("compacted {}", final_path.display());
        Ok(())
    }

    async fn append(&self, collection: &str, keys: &[String]) -> Result<()> {
        let path = self.collection_path(collection)?;
        let mut buf = Vec::new();
        for key in keys {
            if let Some(doc) = self.inner.snapshot(collection, key).await {
                serde_json::to_writer(
                    &mut buf,
                    &Line {
                        key: key.clone(),
                        doc,
                    },
                )?;
                buf.push(b'\n');
            }
        }
        if buf.is_empty() {
            return Ok(());
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(&buf).await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for JsonlStore {
    async fn ensure_index(&self, collection: &str, field: &str) -> Result<()> {
        self.inner.ensure_index(collection, field).await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        self.inner.get(collection, key).await
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Record>> {
        self.inner.find_by_field(collection, field, value).await
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        projection: &[&str],
    ) -> Result<Vec<Record>> {
        self.inner.find_many(collection, filter, projection).await
    }

    async fn keys(&self, collection: &str) -> Result<HashSet<String>> {
        self.inner.keys(collection).await
    }

    async fn upsert_many(&self, collection: &str, records: Vec<Record>) -> Result<UpsertOutcome> {
        self.collection_path(collection)?;
        let _guard = self.write_lock.lock().await;
        let keys: Vec<String> = records.iter().map(|r| r.key.clone()).collect();
        let outcome = self.inner.upsert_many(collection, records).await?;
        self.append(collection, &keys).await?;
        Ok(outcome)
    }

    async fn update_fields(&self, collection: &str, key: &str, fields: Document) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let updated = self.inner.update_fields(collection, key, fields).await?;
        if updated {
            self.append(collection, &[key.to_string()]).await?;
        }
        Ok(updated)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.inner.count(collection).await
    }

    async fn collections(&self) -> Result<Vec<String>> {
        self.inner.collections().await
    }
}
