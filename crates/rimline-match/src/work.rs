//! Work matching: repository works against graph works by identifier equality.
//!
//! Two works are the same when they agree on the normalized DOI, the graph
//! ID, or the internal repository ID. Lookups try them in that order and the
//! first hit is the reported key. Each side is matched at most once per run,
//! and pairs already linked both ways by an earlier run are claimed first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rimline_core::{GraphBackfill, fmt_num, normalize_doi, short_id};
use rimline_store::{Document, DocumentStore, Filter, Record};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::config::MatchSettings;

/// Written on repository works
pub const OPENALEX_ID: &str = "openalex_id";
pub const MATCHED_ON: &str = "matched_on";
/// Written on graph works
pub const REPOSITORY_ID: &str = "repository_id";

const DOI: &str = "doi";

/// Identifier a match was made on, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKey {
    Doi,
    GraphId,
    RepositoryId,
}

impl WorkKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Doi => "doi",
            Self::GraphId => "graph_id",
            Self::RepositoryId => "repository_id",
        }
    }
}

impl std::fmt::Display for WorkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identifiers of one work, normalized for comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkIdentity {
    /// Store key of the record this identity was read from
    pub key: String,
    /// Short graph ID (`W123`)
    pub graph_id: Option<String>,
    /// `https://doi.org/...`, lower-cased
    pub doi: Option<String>,
    pub internal_repository_id: Option<String>,
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

impl WorkIdentity {
    /// Graph work: keyed by its graph ID, linked back through `repository_id`.
    pub fn from_graph(record: &Record) -> Self {
        Self {
            key: record.key.clone(),
            graph_id: Some(short_id(&record.key).to_string()),
            doi: record.get_str(DOI).and_then(|d| normalize_doi(d).ok()),
            internal_repository_id: non_empty(record.get_str(REPOSITORY_ID)),
        }
    }

    /// Repository work: keyed by its internal ID, graph ID from an earlier match.
    pub fn from_repository(record: &Record) -> Self {
        Self {
            key: record.key.clone(),
            graph_id: non_empty(record.get_str(OPENALEX_ID).map(short_id)),
            doi: record.get_str(DOI).and_then(|d| normalize_doi(d).ok()),
            internal_repository_id: Some(record.key.clone()),
        }
    }

    /// DOI or graph ID present. Without either, only an explicit repository
    /// link on the graph side can match the work.
    pub fn is_matchable(&self) -> bool {
        self.doi.is_some() || self.graph_id.is_some()
    }
}

/// The first identifier `a` and `b` agree on, or `None` for different works.
pub fn same_work(a: &WorkIdentity, b: &WorkIdentity) -> Option<WorkKey> {
    fn agree(x: &Option<String>, y: &Option<String>) -> bool {
        matches!((x, y), (Some(x), Some(y)) if x == y)
    }
    if agree(&a.doi, &b.doi) {
        Some(WorkKey::Doi)
    } else if agree(&a.graph_id, &b.graph_id) {
        Some(WorkKey::GraphId)
    } else if agree(&a.internal_repository_id, &b.internal_repository_id) {
        Some(WorkKey::RepositoryId)
    } else {
        None
    }
}

/// Graph works indexed by each identifier type.
#[derive(Debug, Default)]
struct WorkIndex {
    works: Vec<WorkIdentity>,
    by_doi: FxHashMap<String, usize>,
    by_graph_id: FxHashMap<String, usize>,
    by_repository_id: FxHashMap<String, usize>,
}

impl WorkIndex {
    fn build(works: Vec<WorkIdentity>) -> Self {
        let mut index = Self::default();
        for (i, w) in works.iter().enumerate() {
            if let Some(doi) = &w.doi {
                index.by_doi.entry(doi.clone()).or_insert(i);
            }
            if let Some(id) = &w.graph_id {
                index.by_graph_id.entry(id.clone()).or_insert(i);
            }
            if let Some(id) = &w.internal_repository_id {
                index.by_repository_id.entry(id.clone()).or_insert(i);
            }
        }
        index.works = works;
        index
    }

    /// Graph work that `work` and an earlier run linked in both directions.
    fn linked(&self, work: &WorkIdentity) -> Option<&WorkIdentity> {
        let hit = &self.works[*self.by_graph_id.get(work.graph_id.as_ref()?)?];
        (hit.internal_repository_id.as_deref() == Some(work.key.as_str())).then_some(hit)
    }

    /// First unclaimed graph work sharing an identifier with `work`.
    fn lookup(&self, work: &WorkIdentity, claimed: &FxHashSet<String>) -> Option<(&WorkIdentity, WorkKey)> {
        let probes = [
            (work.doi.as_ref(), &self.by_doi, WorkKey::Doi),
            (work.graph_id.as_ref(), &self.by_graph_id, WorkKey::GraphId),
            (
                work.internal_repository_id.as_ref(),
                &self.by_repository_id,
                WorkKey::RepositoryId,
            ),
        ];
        probes.into_iter().find_map(|(value, map, key)| {
            let hit = &self.works[*map.get(value?)?];
            (!claimed.contains(&hit.key)).then_some((hit, key))
        })
    }
}

/// One accepted match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkMatch {
    pub repository_key: String,
    pub graph_key: String,
    pub on: WorkKey,
}

/// Partition of repository works after one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkMatchReport {
    pub repository_works: usize,
    pub graph_works: usize,
    pub by_doi: usize,
    pub by_graph_id: usize,
    pub by_repository_id: usize,
    /// Matchable but not matched
    pub unmatched: usize,
    /// No DOI and no graph ID; never retried within the run
    pub unmatchable: usize,
    /// DOIs sent to the graph backfill
    pub backfill_requested: usize,
    pub matches: Vec<WorkMatch>,
    pub elapsed: Duration,
}

impl WorkMatchReport {
    pub fn matched(&self) -> usize {
        self.by_doi + self.by_graph_id + self.by_repository_id
    }

    pub fn log(&self) {
        log::info!("=== Work matching ===");
        log::info!(
            "Works: {} repository, {} graph",
            fmt_num(self.repository_works),
            fmt_num(self.graph_works)
        );
        log::info!(
            "Matched: {} (doi {}, graph id {}, repository id {})",
            fmt_num(self.matched()),
            self.by_doi,
            self.by_graph_id,
            self.by_repository_id
        );
        log::info!(
            "Unmatched: {} ({} without usable identifiers)",
            fmt_num(self.unmatched),
            self.unmatchable
        );
        if self.backfill_requested > 0 {
            log::info!("Backfill: {} DOIs requested", self.backfill_requested);
        }
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
    }
}

#[derive(Default)]
struct RunState {
    /// Indexes into the repository works
    matched: FxHashSet<usize>,
    /// Graph work keys
    claimed: FxHashSet<String>,
    report: WorkMatchReport,
}

pub struct WorkMatcher {
    store: Arc<dyn DocumentStore>,
    backfill: Arc<dyn GraphBackfill>,
    settings: MatchSettings,
}

impl WorkMatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        backfill: Arc<dyn GraphBackfill>,
        settings: MatchSettings,
    ) -> Self {
        Self {
            store,
            backfill,
            settings,
        }
    }

    async fn load(&self, collection: &str, fields: &[&str]) -> Result<Vec<Record>> {
        self.store
            .find_many(collection, &Filter::all(), fields)
            .await
            .with_context(|| format!("loading {collection}"))
    }

    async fn graph_index(&self) -> Result<WorkIndex> {
        let records = self
            .load(&self.settings.graph_works, &[DOI, REPOSITORY_ID])
            .await?;
        Ok(WorkIndex::build(
            records.iter().map(WorkIdentity::from_graph).collect(),
        ))
    }

    pub async fn run(&self) -> Result<WorkMatchReport> {
        let start = Instant::now();
        let repository: Vec<WorkIdentity> = self
            .load(&self.settings.repository_works, &[DOI, OPENALEX_ID])
            .await?
            .iter()
            .map(WorkIdentity::from_repository)
            .collect();
        let mut index = self.graph_index().await?;

        let mut state = RunState::default();
        state.report.repository_works = repository.len();

        let pending: Vec<usize> = (0..repository.len()).collect();
        self.link_pass(&repository, &index, &mut state).await?;
        self.match_pass(&repository, &pending, &index, &mut state).await?;

        let unmatchable: FxHashSet<usize> = (0..repository.len())
            .filter(|i| !state.matched.contains(i) && !repository[*i].is_matchable())
            .collect();
        let retry: Vec<usize> = (0..repository.len())
            .filter(|i| !state.matched.contains(i) && !unmatchable.contains(i))
            .collect();

        // DOIs the graph side does not have at all; a DOI already present
        // but claimed by another repository work would not help.
        let mut dois: Vec<String> = retry
            .iter()
            .filter_map(|&i| repository[i].doi.clone())
            .filter(|d| !index.by_doi.contains_key(d))
            .collect();
        dois.sort_unstable();
        dois.dedup();

        if self.settings.backfill && !dois.is_empty() {
            state.report.backfill_requested = dois.len();
            match self.backfill.works_by_doi(&dois).await {
                Ok(0) => log::info!("backfill found none of {} DOIs", dois.len()),
                Ok(n) => {
                    log::info!("backfill stored {n} works, re-matching {} works", retry.len());
                    index = self.graph_index().await?;
                    self.match_pass(&repository, &retry, &index, &mut state).await?;
                }
                Err(e) => log::warn!("DOI backfill failed: {e:#}"),
            }
        }

        let mut report = state.report;
        report.graph_works = index.works.len();
        report.unmatchable = unmatchable.len();
        report.unmatched = repository.len() - state.matched.len() - unmatchable.len();
        report.elapsed = start.elapsed();
        report.log();
        Ok(report)
    }

    /// Keep the pairs an earlier run wrote back on both sides.
    async fn link_pass(
        &self,
        repository: &[WorkIdentity],
        index: &WorkIndex,
        state: &mut RunState,
    ) -> Result<()> {
        for (i, work) in repository.iter().enumerate() {
            let Some(graph) = index.linked(work) else {
                continue;
            };
            if state.claimed.contains(&graph.key) {
                continue;
            }
            let on = same_work(work, graph).unwrap_or(WorkKey::GraphId);
            self.claim(state, i, work, graph, on).await?;
        }
        Ok(())
    }

    async fn match_pass(
        &self,
        repository: &[WorkIdentity],
        pending: &[usize],
        index: &WorkIndex,
        state: &mut RunState,
    ) -> Result<()> {
        for &i in pending {
            if state.matched.contains(&i) {
                continue;
            }
            let work = &repository[i];
            let Some((graph, on)) = index.lookup(work, &state.claimed) else {
                continue;
            };
            self.claim(state, i, work, graph, on).await?;
        }
        Ok(())
    }

    async fn claim(
        &self,
        state: &mut RunState,
        i: usize,
        work: &WorkIdentity,
        graph: &WorkIdentity,
        on: WorkKey,
    ) -> Result<()> {
        let m = WorkMatch {
            repository_key: work.key.clone(),
            graph_key: graph.key.clone(),
            on,
        };
        self.write_back(&m).await?;
        log::debug!("{} -> {} on {on}", m.repository_key, m.graph_key);

        state.matched.insert(i);
        state.claimed.insert(graph.key.clone());
        match on {
            WorkKey::Doi => state.report.by_doi += 1,
            WorkKey::GraphId => state.report.by_graph_id += 1,
            WorkKey::RepositoryId => state.report.by_repository_id += 1,
        }
        state.report.matches.push(m);
        Ok(())
    }

    async fn write_back(&self, m: &WorkMatch) -> Result<()> {
        let mut repo = Document::new();
        repo.insert(OPENALEX_ID.into(), Value::String(m.graph_key.clone()));
        repo.insert(MATCHED_ON.into(), Value::String(m.on.to_string()));
        self.store
            .update_fields(&self.settings.repository_works, &m.repository_key, repo)
            .await
            .with_context(|| format!("writing match for {}", m.repository_key))?;

        let mut graph = Document::new();
        graph.insert(REPOSITORY_ID.into(), Value::String(m.repository_key.clone()));
        self.store
            .update_fields(&self.settings.graph_works, &m.graph_key, graph)
            .await
            .with_context(|| format!("writing match for {}", m.graph_key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rimline_core::NoBackfill;
    use rimline_store::MemoryStore;
    use serde_json::json;
    use std::sync::Mutex;

    fn identity(doi: Option<&str>, graph_id: Option<&str>) -> WorkIdentity {
        WorkIdentity {
            key: String::new(),
            graph_id: graph_id.map(str::to_string),
            doi: doi.map(str::to_string),
            internal_repository_id: None,
        }
    }

    #[test]
    fn doi_agreement_outranks_conflicting_graph_ids() {
        let a = identity(Some("https://doi.org/10.1/a"), Some("G1"));
        let b = identity(Some("https://doi.org/10.1/a"), Some("G2"));
        assert_eq!(same_work(&a, &b), Some(WorkKey::Doi));
    }

    #[test]
    fn any_shared_identifier_is_enough() {
        let a = identity(Some("https://doi.org/10.1/a"), Some("G1"));
        let b = identity(Some("https://doi.org/10.1/b"), Some("G1"));
        assert_eq!(same_work(&a, &b), Some(WorkKey::GraphId));

        let mut c = identity(None, None);
        let mut d = identity(None, None);
        assert_eq!(same_work(&c, &d), None);
        c.internal_repository_id = Some("oai:r:1".into());
        d.internal_repository_id = Some("oai:r:1".into());
        assert_eq!(same_work(&c, &d), Some(WorkKey::RepositoryId));
    }

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    async fn put(store: &MemoryStore, collection: &str, rows: Vec<(&str, Value)>) {
        let records = rows
            .into_iter()
            .map(|(k, v)| Record::new(k, doc(v)))
            .collect();
        store.upsert_many(collection, records).await.unwrap();
    }

    async fn fixture() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        put(
            &store,
            "works",
            vec![
                ("https://openalex.org/W1", json!({"doi": "https://doi.org/10.1/a"})),
                ("https://openalex.org/W2", json!({"doi": "https://doi.org/10.1/b"})),
                ("https://openalex.org/W3", json!({"title": "no doi"})),
                ("https://openalex.org/W5", json!({"repository_id": "oai:r:6"})),
            ],
        )
        .await;
        put(
            &store,
            "repository_works",
            vec![
                ("oai:r:1", json!({"doi": "doi:10.1/A"})),
                ("oai:r:2", json!({"openalex_id": "https://openalex.org/W3"})),
                ("oai:r:3", json!({"doi": "10.1/c"})),
                ("oai:r:4", json!({"title": "nothing to go on"})),
                ("oai:r:5", json!({"doi": "https://doi.org/10.1/a"})),
                ("oai:r:6", json!({"title": "linked by hand"})),
            ],
        )
        .await;
        store
    }

    #[tokio::test]
    async fn partitions_and_write_back() {
        let store = fixture().await;
        let matcher = WorkMatcher::new(store.clone(), Arc::new(NoBackfill), MatchSettings::default());
        let report = matcher.run().await.unwrap();

        assert_eq!(report.repository_works, 6);
        assert_eq!(report.by_doi, 1);
        assert_eq!(report.by_graph_id, 1);
        assert_eq!(report.by_repository_id, 1);
        // r3 (DOI unknown to the graph) and r5 (duplicate of r1's DOI)
        assert_eq!(report.unmatched, 2);
        assert_eq!(report.unmatchable, 1);
        assert_eq!(report.backfill_requested, 1);

        let r1 = store.get("repository_works", "oai:r:1").await.unwrap().unwrap();
        assert_eq!(r1[OPENALEX_ID], "https://openalex.org/W1");
        assert_eq!(r1[MATCHED_ON], "doi");
        let w1 = store.get("works", "https://openalex.org/W1").await.unwrap().unwrap();
        assert_eq!(w1[REPOSITORY_ID], "oai:r:1");
        let r2 = store.get("repository_works", "oai:r:2").await.unwrap().unwrap();
        assert_eq!(r2[MATCHED_ON], "graph_id");
        let r6 = store.get("repository_works", "oai:r:6").await.unwrap().unwrap();
        assert_eq!(r6[OPENALEX_ID], "https://openalex.org/W5");
        assert!(store.get("repository_works", "oai:r:4").await.unwrap().unwrap().get(OPENALEX_ID).is_none());
    }

    #[tokio::test]
    async fn rerun_reaches_the_same_matches() {
        let store = fixture().await;
        let matcher = WorkMatcher::new(store.clone(), Arc::new(NoBackfill), MatchSettings::default());
        let first = matcher.run().await.unwrap();
        let second = matcher.run().await.unwrap();
        let pairs = |r: &WorkMatchReport| {
            let mut v: Vec<(String, String)> = r
                .matches
                .iter()
                .map(|m| (m.repository_key.clone(), m.graph_key.clone()))
                .collect();
            v.sort();
            v
        };
        assert_eq!(pairs(&first), pairs(&second));
        assert_eq!(second.unmatched, first.unmatched);
    }

    #[tokio::test]
    async fn earlier_link_kept_when_a_new_record_shares_its_doi() {
        let store = Arc::new(MemoryStore::new());
        put(&store, "works", vec![("https://openalex.org/W1", json!({"doi": "https://doi.org/10.1/a"}))]).await;
        put(&store, "repository_works", vec![("oai:r:5", json!({"doi": "https://doi.org/10.1/a"}))]).await;
        let matcher = WorkMatcher::new(store.clone(), Arc::new(NoBackfill), MatchSettings::default());
        assert_eq!(matcher.run().await.unwrap().by_doi, 1);

        // Sorts before oai:r:5 and carries the same DOI
        put(&store, "repository_works", vec![("oai:r:0", json!({"doi": "https://doi.org/10.1/a"}))]).await;
        let report = matcher.run().await.unwrap();

        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].repository_key, "oai:r:5");
        assert_eq!(report.matches[0].graph_key, "https://openalex.org/W1");
        assert_eq!(report.matches[0].on, WorkKey::Doi);
        assert_eq!(report.unmatched, 1);

        let r5 = store.get("repository_works", "oai:r:5").await.unwrap().unwrap();
        assert_eq!(r5[OPENALEX_ID], "https://openalex.org/W1");
        let w1 = store.get("works", "https://openalex.org/W1").await.unwrap().unwrap();
        assert_eq!(w1[REPOSITORY_ID], "oai:r:5");
        let r0 = store.get("repository_works", "oai:r:0").await.unwrap().unwrap();
        assert!(r0.get(OPENALEX_ID).is_none());
    }

    /// Stores a graph work for every requested DOI.
    struct StoreDois {
        store: Arc<MemoryStore>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GraphBackfill for StoreDois {
        async fn works_by_doi(&self, dois: &[String]) -> Result<usize> {
            self.requested.lock().unwrap().extend(dois.iter().cloned());
            let records: Vec<Record> = dois
                .iter()
                .map(|d| {
                    let mut doc = Document::new();
                    doc.insert("doi".into(), json!(d));
                    Record::new(format!("https://openalex.org/W{}", d.len()), doc)
                })
                .collect();
            let n = records.len();
            self.store.upsert_many("works", records).await?;
            Ok(n)
        }

        async fn authors_by_orcid(&self, _orcids: &[String]) -> Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn backfilled_dois_matched_on_second_pass() {
        let store = fixture().await;
        let backfill = Arc::new(StoreDois {
            store: store.clone(),
            requested: Mutex::new(Vec::new()),
        });
        let matcher = WorkMatcher::new(store.clone(), backfill.clone(), MatchSettings::default());
        let report = matcher.run().await.unwrap();

        assert_eq!(*backfill.requested.lock().unwrap(), vec!["https://doi.org/10.1/c"]);
        assert_eq!(report.by_doi, 2);
        assert_eq!(report.unmatched, 1);
        assert_eq!(report.graph_works, 5);
        let r3 = store.get("repository_works", "oai:r:3").await.unwrap().unwrap();
        assert_eq!(r3[MATCHED_ON], "doi");
    }
}
