//! Generic harvester.
//!
//! A [`Harvest`] source supplies two things: how to build its default item
//! list from what the store already holds, and how to fetch one item. The
//! [`Harvester`] run loop does the rest:
//!
//! ```text
//! Idle -> BuildingItemList -> Fetching -> Draining -> Done
//! ```
//!
//! Items go through the [`Throttle`]; fetched records are buffered and
//! upserted in groups of `flush_size`. A per-item failure is logged and
//! skipped or stubbed. An auth or fatal error stops starting new items,
//! flushes what is buffered and returns an error for this harvester only.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use indicatif::ProgressBar;
use rimline_store::{DocumentStore, Record, UpsertOutcome};

use crate::error::{ErrorClass, FetchError};
use crate::progress::SharedProgress;
use crate::record::SourceRecord;
use crate::shutdown::Shutdown;
use crate::throttle::Throttle;

/// What to do with an item whose fetch failed permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log and drop
    #[default]
    Skip,
    /// Store a minimal stub record under the item's key
    Stub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestState {
    Idle,
    BuildingItemList,
    Fetching,
    Draining,
    Done,
}

impl std::fmt::Display for HarvestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::BuildingItemList => "building item list",
            Self::Fetching => "fetching",
            Self::Draining => "draining",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// One external source.
#[async_trait]
pub trait Harvest: Send + Sync {
    /// One fetch's input descriptor
    type Item: Debug + Send + Sync;

    fn name(&self) -> &str;

    /// Target collection in the store
    fn collection(&self) -> &str;

    /// Fields indexed before the run; the "already harvested" checks rely on them.
    fn indexes(&self) -> Vec<String> {
        Vec::new()
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Skip
    }

    /// Runs once before fetching starts (credential refresh, probing).
    async fn prepare(&self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Items still to fetch, derived from the store's current contents.
    async fn default_items(&self, store: &dyn DocumentStore) -> Result<Vec<Self::Item>>;

    /// Fetch and transform one item.
    ///
    /// Sources that paginate persist each page through `ctx` themselves and
    /// return nothing; single-shot sources return their records.
    async fn fetch(
        &self,
        item: &Self::Item,
        ctx: &HarvestContext,
    ) -> Result<Vec<SourceRecord>, FetchError>;

    /// Natural key for a stub record, when the item has one.
    fn item_key(&self, _item: &Self::Item) -> Option<String> {
        None
    }
}

/// Handle a fetch uses to write pages durably while it is still running.
pub struct HarvestContext {
    store: Arc<dyn DocumentStore>,
    collection: String,
    records: AtomicUsize,
    inserted: AtomicUsize,
    updated: AtomicUsize,
}

impl HarvestContext {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            records: AtomicUsize::new(0),
            inserted: AtomicUsize::new(0),
            updated: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Upsert a page into the harvest's collection before returning.
    pub async fn persist(&self, records: Vec<SourceRecord>) -> Result<UpsertOutcome, FetchError> {
        if records.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let records: Vec<Record> = records.into_iter().map(SourceRecord::into_record).collect();
        let count = records.len();
        let outcome = self
            .store
            .upsert_many(&self.collection, records)
            .await
            .map_err(|e| FetchError::Fatal(format!("store write to {}: {e:#}", self.collection)))?;
        self.records.fetch_add(count, Ordering::Relaxed);
        self.inserted.fetch_add(outcome.inserted, Ordering::Relaxed);
        self.updated.fetch_add(outcome.updated, Ordering::Relaxed);
        Ok(outcome)
    }

    fn totals(&self) -> (usize, UpsertOutcome) {
        (
            self.records.load(Ordering::Relaxed),
            UpsertOutcome {
                inserted: self.inserted.load(Ordering::Relaxed),
                updated: self.updated.load(Ordering::Relaxed),
            },
        )
    }
}

/// Run-loop knobs shared by every source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestSettings {
    pub max_at_once: usize,
    /// 0 disables the start-rate limit
    pub max_per_second: u32,
    pub flush_size: usize,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            max_at_once: 5,
            max_per_second: 10,
            flush_size: 100,
        }
    }
}

/// Counters from one harvester run.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestSummary {
    pub name: String,
    pub collection: String,
    pub state: HarvestState,
    pub items: usize,
    /// Items fetched successfully
    pub fetched: usize,
    /// Items whose fetch failed and were dropped
    pub skipped: usize,
    /// Items whose fetch failed and were stored as stubs
    pub stubbed: usize,
    /// Records written (pages persisted during fetch plus buffered flushes)
    pub records: usize,
    /// Natural keys that did not exist before this run
    pub new_keys: usize,
    pub updated_keys: usize,
    /// Stopped early by a shutdown request
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl HarvestSummary {
    fn new(name: &str, collection: &str) -> Self {
        Self {
            name: name.to_string(),
            collection: collection.to_string(),
            state: HarvestState::Idle,
            items: 0,
            fetched: 0,
            skipped: 0,
            stubbed: 0,
            records: 0,
            new_keys: 0,
            updated_keys: 0,
            interrupted: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn failed(&self) -> usize {
        self.skipped + self.stubbed
    }

    pub fn log(&self) {
        log::info!("=== {} harvest ({}) ===", self.name, self.collection);
        log::info!(
            "Items: {}/{} fetched ({} skipped, {} stubbed)",
            self.fetched,
            self.items,
            self.skipped,
            self.stubbed
        );
        log::info!(
            "Records: {} upserted ({} new, {} updated)",
            self.records,
            self.new_keys,
            self.updated_keys
        );
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
        if self.interrupted {
            log::warn!("{}: interrupted before all items were fetched", self.name);
        }
    }
}

/// The generic run loop, parameterized by store, limits and shutdown flag.
pub struct Harvester {
    store: Arc<dyn DocumentStore>,
    settings: HarvestSettings,
    shutdown: Shutdown,
    progress: Option<SharedProgress>,
}

impl Harvester {
    pub fn new(store: Arc<dyn DocumentStore>, settings: HarvestSettings) -> Self {
        Self {
            store,
            settings,
            shutdown: Shutdown::new(),
            progress: None,
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn settings(&self) -> &HarvestSettings {
        &self.settings
    }

    /// Harvest `items`, or the source's default items when `items` is empty.
    pub async fn run<H: Harvest>(&self, source: &H, items: Vec<H::Item>) -> Result<HarvestSummary> {
        let start = Instant::now();
        let name = source.name();
        let collection = source.collection();
        let mut summary = HarvestSummary::new(name, collection);

        for field in source.indexes() {
            self.store
                .ensure_index(collection, &field)
                .await
                .with_context(|| format!("{name}: index {collection}.{field}"))?;
        }

        summary.state = HarvestState::BuildingItemList;
        let items = if items.is_empty() {
            source
                .default_items(self.store.as_ref())
                .await
                .with_context(|| format!("{name}: building default item list"))?
        } else {
            items
        };
        summary.items = items.len();
        log::info!("{name}: {} items to fetch", items.len());

        if items.is_empty() {
            summary.state = HarvestState::Done;
            summary.elapsed = start.elapsed();
            summary.log();
            return Ok(summary);
        }

        source
            .prepare()
            .await
            .with_context(|| format!("{name}: preparing harvest"))?;

        summary.state = HarvestState::Fetching;
        let pb = match &self.progress {
            Some(p) => p.items_bar(name, items.len() as u64),
            None => ProgressBar::hidden(),
        };
        let ctx = HarvestContext::new(Arc::clone(&self.store), collection);
        let throttle = Throttle::new(self.settings.max_at_once, self.settings.max_per_second);
        let flush_size = self.settings.flush_size.max(1);
        let policy = source.failure_policy();

        let mut buffer: Vec<SourceRecord> = Vec::new();
        let mut flushed = UpsertOutcome::default();
        let mut flushed_records = 0usize;
        let mut abort: Option<FetchError> = None;

        {
            let ctx = &ctx;
            let mut results = throttle.run(items.iter(), |item| async move {
                let result = source.fetch(item, ctx).await;
                (item, result)
            });

            while let Some((item, result)) = results.next().await {
                pb.inc(1);
                match result {
                    Ok(records) => {
                        summary.fetched += 1;
                        buffer.extend(records);
                    }
                    Err(e) => match e.class() {
                        ErrorClass::Auth | ErrorClass::Fatal => {
                            log::error!("{name}: aborting on {item:?}: {e}");
                            abort = Some(e);
                            break;
                        }
                        ErrorClass::Permanent if policy == FailurePolicy::Stub => {
                            match source.item_key(item) {
                                Some(key) => {
                                    log::warn!("{name}: {item:?} failed, storing stub: {e}");
                                    buffer.push(SourceRecord::stub(key, &e.to_string()));
                                    summary.stubbed += 1;
                                }
                                None => {
                                    log::warn!("{name}: {item:?} failed: {e}");
                                    summary.skipped += 1;
                                }
                            }
                        }
                        _ => {
                            log::warn!("{name}: {item:?} failed: {e}");
                            summary.skipped += 1;
                        }
                    },
                }

                if buffer.len() >= flush_size {
                    flushed_records += buffer.len();
                    flushed += self.flush(collection, &mut buffer).await?;
                }

                if self.shutdown.is_requested() {
                    log::warn!("{name}: shutdown requested, draining");
                    summary.interrupted = true;
                    break;
                }
            }
        }

        summary.state = HarvestState::Draining;
        flushed_records += buffer.len();
        flushed += self.flush(collection, &mut buffer).await?;
        pb.finish_and_clear();

        let (persisted_records, persisted) = ctx.totals();
        summary.records = flushed_records + persisted_records;
        summary.new_keys = flushed.inserted + persisted.inserted;
        summary.updated_keys = flushed.updated + persisted.updated;
        summary.elapsed = start.elapsed();

        if let Some(e) = abort {
            return Err(anyhow::Error::new(e).context(format!(
                "{name}: harvest aborted after {} of {} items",
                summary.fetched, summary.items
            )));
        }

        summary.state = HarvestState::Done;
        summary.log();
        Ok(summary)
    }

    async fn flush(&self, collection: &str, buffer: &mut Vec<SourceRecord>) -> Result<UpsertOutcome> {
        if buffer.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let records: Vec<Record> = buffer.drain(..).map(SourceRecord::into_record).collect();
        let count = records.len();
        let outcome = self
            .store
            .upsert_many(collection, records)
            .await
            .with_context(|| format!("upserting {count} records into {collection}"))?;
        log::debug!(
            "{collection}: flushed {count} records ({} new)",
            outcome.inserted
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rimline_store::{Document, Filter, MemoryStore};
    use serde_json::{Value, json};

    /// Fetches `n` → one record keyed `k{n}`; multiples of `missing_every`
    /// fail with 404 (0 disables), `fatal_at` fails fatally.
    struct Numbers {
        policy: FailurePolicy,
        missing_every: u32,
        fatal_at: Option<u32>,
        defaults: Vec<u32>,
    }

    impl Numbers {
        fn new() -> Self {
            Self {
                policy: FailurePolicy::Skip,
                missing_every: 7,
                fatal_at: None,
                defaults: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Harvest for Numbers {
        type Item = u32;

        fn name(&self) -> &str {
            "numbers"
        }

        fn collection(&self) -> &str {
            "numbers"
        }

        fn failure_policy(&self) -> FailurePolicy {
            self.policy
        }

        async fn default_items(&self, store: &dyn DocumentStore) -> Result<Vec<u32>> {
            let have = store.keys("numbers").await?;
            Ok(self
                .defaults
                .iter()
                .copied()
                .filter(|n| !have.contains(&format!("k{n}")))
                .collect())
        }

        async fn fetch(&self, item: &u32, _ctx: &HarvestContext) -> Result<Vec<SourceRecord>, FetchError> {
            if self.fatal_at == Some(*item) {
                return Err(FetchError::Connect("refused".into()));
            }
            if self.missing_every != 0 && item % self.missing_every == 0 {
                return Err(FetchError::http(404, "missing"));
            }
            let mut doc = Document::new();
            doc.insert("n".into(), json!(item));
            Ok(vec![SourceRecord::map(format!("k{item}"), doc)])
        }

        fn item_key(&self, item: &u32) -> Option<String> {
            Some(format!("k{item}"))
        }
    }

    fn harvester(store: &Arc<MemoryStore>) -> Harvester {
        let store: Arc<dyn DocumentStore> = store.clone();
        Harvester::new(
            store,
            HarvestSettings {
                max_at_once: 4,
                max_per_second: 0,
                flush_size: 10,
            },
        )
    }

    #[tokio::test]
    async fn failed_items_skipped_run_continues() {
        let store = Arc::new(MemoryStore::new());
        let summary = harvester(&store)
            .run(&Numbers::new(), (1..=30).collect())
            .await
            .unwrap();
        // 7, 14, 21, 28 fail
        assert_eq!(summary.items, 30);
        assert_eq!(summary.fetched, 26);
        assert_eq!(summary.skipped, 4);
        assert_eq!(summary.stubbed, 0);
        assert_eq!(summary.new_keys, 26);
        assert_eq!(summary.state, HarvestState::Done);
        assert_eq!(store.count("numbers").await.unwrap(), 26);
    }

    #[tokio::test]
    async fn stub_policy_stores_stubs() {
        let store = Arc::new(MemoryStore::new());
        let mut source = Numbers::new();
        source.policy = FailurePolicy::Stub;
        let summary = harvester(&store).run(&source, (1..=14).collect()).await.unwrap();
        assert_eq!(summary.stubbed, 2);
        assert_eq!(summary.records, 14);
        let stub = store.get("numbers", "k7").await.unwrap().unwrap();
        assert_eq!(stub.get("_stub"), Some(&Value::Bool(true)));
        let stubs = store
            .find_many("numbers", &Filter::all().exists("_stub"), &[])
            .await
            .unwrap();
        assert_eq!(stubs.len(), 2);
    }

    #[tokio::test]
    async fn successful_refetch_clears_stub() {
        let store = Arc::new(MemoryStore::new());
        let h = harvester(&store);
        let mut source = Numbers::new();
        source.policy = FailurePolicy::Stub;
        let first = h.run(&source, vec![7]).await.unwrap();
        assert_eq!(first.stubbed, 1);

        source.missing_every = 0;
        let second = h.run(&source, vec![7]).await.unwrap();
        assert_eq!(second.fetched, 1);
        assert_eq!(second.updated_keys, 1);

        let doc = store.get("numbers", "k7").await.unwrap().unwrap();
        assert_eq!(doc["n"], 7);
        assert!(!doc.contains_key("_stub"));
        assert!(!doc.contains_key("_error"));
        let stubs = store
            .find_many("numbers", &Filter::all().exists("_stub"), &[])
            .await
            .unwrap();
        assert!(stubs.is_empty());
    }

    #[tokio::test]
    async fn second_run_adds_no_new_keys() {
        let store = Arc::new(MemoryStore::new());
        let h = harvester(&store);
        let first = h.run(&Numbers::new(), (1..=20).collect()).await.unwrap();
        let second = h.run(&Numbers::new(), (1..=20).collect()).await.unwrap();
        assert_eq!(first.new_keys, 18);
        assert_eq!(second.new_keys, 0);
        assert_eq!(second.updated_keys, 18);
    }

    #[tokio::test]
    async fn default_items_skip_satisfied_keys() {
        let store = Arc::new(MemoryStore::new());
        let h = harvester(&store);
        let mut source = Numbers::new();
        source.defaults = (1..=5).collect();
        let first = h.run(&source, Vec::new()).await.unwrap();
        assert_eq!(first.items, 5);
        let second = h.run(&source, Vec::new()).await.unwrap();
        assert_eq!(second.items, 0);
        assert_eq!(second.records, 0);
        assert_eq!(second.state, HarvestState::Done);
    }

    #[tokio::test]
    async fn fatal_error_aborts_after_flushing() {
        let store = Arc::new(MemoryStore::new());
        let h = Harvester::new(
            store.clone() as Arc<dyn DocumentStore>,
            HarvestSettings {
                max_at_once: 1,
                max_per_second: 0,
                flush_size: 100,
            },
        );
        let mut source = Numbers::new();
        source.fatal_at = Some(4);
        let err = h.run(&source, (1..=10).collect()).await.unwrap_err();
        assert!(format!("{err:#}").contains("aborted"));
        // 1..=3 were fetched before the fatal item and must be durable
        assert_eq!(store.count("numbers").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn shutdown_stops_starting_items() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = Shutdown::new();
        shutdown.request();
        let h = harvester(&store).with_shutdown(shutdown);
        let summary = h.run(&Numbers::new(), (1..=100).collect()).await.unwrap();
        assert!(summary.interrupted);
        assert!(summary.fetched < 100);
        assert_eq!(store.count("numbers").await.unwrap(), summary.records);
    }

    struct Pager;

    #[async_trait]
    impl Harvest for Pager {
        type Item = &'static str;

        fn name(&self) -> &str {
            "pager"
        }

        fn collection(&self) -> &str {
            "pages"
        }

        async fn default_items(&self, _store: &dyn DocumentStore) -> Result<Vec<&'static str>> {
            Ok(vec!["q"])
        }

        async fn fetch(&self, item: &&'static str, ctx: &HarvestContext) -> Result<Vec<SourceRecord>, FetchError> {
            for page in 0..3 {
                let records = (0..5)
                    .map(|i| SourceRecord::map(format!("{item}-{page}-{i}"), Document::new()))
                    .collect();
                ctx.persist(records).await?;
                // Each page is visible before the next is requested
                assert_eq!(ctx.store().count(ctx.collection()).await.unwrap(), (page + 1) * 5);
            }
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn persisted_pages_counted() {
        let store = Arc::new(MemoryStore::new());
        let summary = harvester(&store).run(&Pager, Vec::new()).await.unwrap();
        assert_eq!(summary.records, 15);
        assert_eq!(summary.new_keys, 15);
        assert_eq!(summary.fetched, 1);
    }
}
