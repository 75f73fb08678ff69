//! Author matching: repository authors against graph authors.
//!
//! Cascade per author, strongest evidence first: ORCID, Scopus author ID,
//! ISNI (no graph coverage yet, never matches), then TF-IDF name similarity
//! for authors carrying none of those identifiers. An author matched earlier
//! in the run is not considered again, and an author matched in a previous
//! run is only re-matched by a strictly stronger method.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rimline_core::{GraphBackfill, fmt_num, normalize_orcid, orcid_url};
use rimline_store::{Document, DocumentStore, Filter, Record};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::config::{AuthorFields, MatchSettings};
use crate::tfidf::{NameIndex, normalize_name};

pub const MATCHED_EXTERNAL_ID: &str = "matched_external_id";
pub const MATCHED_DISPLAY_NAME: &str = "matched_display_name";
pub const MATCH_METHOD: &str = "match_method";
pub const MATCH_SCORE: &str = "match_score";

/// Graph author fields
const GRAPH_ORCID: &str = "orcid";
const GRAPH_SCOPUS: &str = "ids.scopus";
const GRAPH_NAME: &str = "display_name";

/// How a match was established, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchMethod {
    Name,
    Scopus,
    Orcid,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Scopus => "scopus",
            Self::Orcid => "orcid",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "name" => Some(Self::Name),
            "scopus" => Some(Self::Scopus),
            "orcid" => Some(Self::Orcid),
            _ => None,
        }
    }
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparable form of a Scopus author ID.
///
/// Graph records carry profile URLs (`...authorDetails.url?authorID=7004212771&...`),
/// repositories usually the bare number.
pub fn scopus_key(value: &str) -> Option<String> {
    let lowered = value.trim().to_lowercase();
    let id = match lowered.find("authorid=") {
        Some(pos) => lowered[pos + "authorid=".len()..]
            .split('&')
            .next()
            .unwrap_or_default(),
        None => lowered.as_str(),
    };
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Last token of the normalized name.
fn surname(name: &str) -> Option<String> {
    normalize_name(name)
        .split(' ')
        .next_back()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Repository author as seen by the matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorIdentity {
    pub key: String,
    /// Bare upper-case ORCID
    pub orcid: Option<String>,
    pub scopus_id: Option<String>,
    pub isni: Option<String>,
    pub display_name: Option<String>,
    /// Method of a match stored by an earlier run
    pub matched: Option<MatchMethod>,
}

impl AuthorIdentity {
    pub fn from_record(record: &Record, fields: &AuthorFields) -> Self {
        Self {
            key: record.key.clone(),
            orcid: record
                .get_str(&fields.orcid)
                .and_then(|s| normalize_orcid(s).ok()),
            scopus_id: record.get_str(&fields.scopus_id).and_then(scopus_key),
            isni: record
                .get_str(&fields.isni)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            display_name: record
                .get_str(&fields.display_name)
                .map(str::to_string),
            matched: record.get_str(MATCH_METHOD).and_then(MatchMethod::from_name),
        }
    }

    pub fn has_identifier(&self) -> bool {
        self.orcid.is_some() || self.scopus_id.is_some() || self.isni.is_some()
    }

    /// Whether a match by `method` may be stored on this author.
    fn accepts(&self, method: MatchMethod) -> bool {
        self.matched.map_or(true, |m| method > m)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    id: String,
    display_name: String,
}

/// Graph authors indexed by every identifier the cascade looks up.
#[derive(Debug, Default)]
struct Candidates {
    list: Vec<Candidate>,
    by_orcid: FxHashMap<String, usize>,
    by_scopus: FxHashMap<String, usize>,
    names: NameIndex,
}

impl Candidates {
    async fn load(store: &dyn DocumentStore, collection: &str) -> Result<Self> {
        let records = store
            .find_many(collection, &Filter::all(), &[GRAPH_ORCID, GRAPH_SCOPUS, GRAPH_NAME])
            .await
            .with_context(|| format!("loading {collection}"))?;

        let mut out = Self::default();
        for record in records {
            let i = out.list.len();
            if let Some(orcid) = record.get_str(GRAPH_ORCID).and_then(|s| normalize_orcid(s).ok()) {
                out.by_orcid.entry(orcid).or_insert(i);
            }
            if let Some(scopus) = record.get_str(GRAPH_SCOPUS).and_then(scopus_key) {
                out.by_scopus.entry(scopus).or_insert(i);
            }
            out.list.push(Candidate {
                display_name: record.get_str(GRAPH_NAME).unwrap_or_default().to_string(),
                id: record.key,
            });
        }
        let names: Vec<&str> = out.list.iter().map(|c| c.display_name.as_str()).collect();
        out.names = NameIndex::fit(&names);
        Ok(out)
    }
}

/// One accepted match.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorMatch {
    pub key: String,
    pub external_id: String,
    pub display_name: String,
    pub method: MatchMethod,
    pub score: f64,
}

impl AuthorMatch {
    fn fields(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(MATCHED_EXTERNAL_ID.into(), Value::String(self.external_id.clone()));
        doc.insert(MATCHED_DISPLAY_NAME.into(), Value::String(self.display_name.clone()));
        doc.insert(MATCH_METHOD.into(), Value::String(self.method.to_string()));
        doc.insert(MATCH_SCORE.into(), Value::from(self.score));
        doc
    }
}

/// Counters from one author matching run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorMatchReport {
    pub authors: usize,
    pub candidates: usize,
    /// Carried a match from an earlier run
    pub previously_matched: usize,
    pub by_orcid: usize,
    pub by_scopus: usize,
    pub by_name: usize,
    /// ORCIDs sent to the graph backfill
    pub orcids_backfilled: usize,
    /// Name-only authors skipped for an ambiguous surname
    pub ambiguous: usize,
    /// Still without any match
    pub unmatched: usize,
    pub matches: Vec<AuthorMatch>,
    pub elapsed: Duration,
}

impl AuthorMatchReport {
    pub fn matched(&self) -> usize {
        self.by_orcid + self.by_scopus + self.by_name
    }

    pub fn log(&self) {
        log::info!("=== Author matching ===");
        log::info!(
            "Authors: {} ({} previously matched) against {} candidates",
            fmt_num(self.authors),
            fmt_num(self.previously_matched),
            fmt_num(self.candidates)
        );
        log::info!(
            "Matched: {} (orcid {}, scopus {}, name {})",
            self.matched(),
            self.by_orcid,
            self.by_scopus,
            self.by_name
        );
        if self.orcids_backfilled > 0 {
            log::info!("Backfill: {} ORCIDs requested", self.orcids_backfilled);
        }
        log::info!(
            "Unmatched: {} ({} skipped for ambiguous surnames)",
            fmt_num(self.unmatched),
            self.ambiguous
        );
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
    }
}

pub struct AuthorMatcher {
    store: Arc<dyn DocumentStore>,
    backfill: Arc<dyn GraphBackfill>,
    settings: MatchSettings,
}

/// Per-run bookkeeping: who got matched in this run.
struct RunState {
    authors: Vec<AuthorIdentity>,
    matched_now: FxHashSet<usize>,
    report: AuthorMatchReport,
}

impl RunState {
    fn is_open(&self, i: usize, method: MatchMethod) -> bool {
        !self.matched_now.contains(&i) && self.authors[i].accepts(method)
    }
}

impl AuthorMatcher {
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

    pub async fn run(&self) -> Result<AuthorMatchReport> {
        let start = Instant::now();
        let fields = &self.settings.author_fields;
        let records = self
            .store
            .find_many(
                &self.settings.repository_authors,
                &Filter::all(),
                &[
                    fields.orcid.as_str(),
                    fields.scopus_id.as_str(),
                    fields.isni.as_str(),
                    fields.display_name.as_str(),
                    MATCH_METHOD,
                ],
            )
            .await
            .with_context(|| format!("loading {}", self.settings.repository_authors))?;

        let authors: Vec<AuthorIdentity> = records
            .iter()
            .map(|r| AuthorIdentity::from_record(r, fields))
            .collect();
        let mut state = RunState {
            report: AuthorMatchReport {
                authors: authors.len(),
                previously_matched: authors.iter().filter(|a| a.matched.is_some()).count(),
                ..AuthorMatchReport::default()
            },
            authors,
            matched_now: FxHashSet::default(),
        };

        let mut candidates =
            Candidates::load(self.store.as_ref(), &self.settings.graph_authors).await?;

        let unresolved = self.orcid_pass(&mut state, &candidates).await?;
        if !unresolved.is_empty() && self.settings.backfill {
            let orcids: Vec<String> = unresolved
                .iter()
                .filter_map(|&i| state.authors[i].orcid.as_deref())
                .filter_map(|o| orcid_url(o).ok())
                .collect();
            state.report.orcids_backfilled = orcids.len();
            match self.backfill.authors_by_orcid(&orcids).await {
                Ok(0) => log::info!("backfill found none of {} ORCIDs", orcids.len()),
                Ok(n) => {
                    log::info!("backfill stored {n} authors, re-checking ORCIDs");
                    candidates =
                        Candidates::load(self.store.as_ref(), &self.settings.graph_authors).await?;
                    self.orcid_pass(&mut state, &candidates).await?;
                }
                Err(e) => log::warn!("ORCID backfill failed: {e:#}"),
            }
        }

        self.scopus_pass(&mut state, &candidates).await?;
        // ISNI: the graph has no ISNI coverage, so this step never matches.
        self.name_pass(&mut state, &candidates).await?;

        state.report.candidates = candidates.list.len();
        state.report.unmatched = state
            .authors
            .iter()
            .enumerate()
            .filter(|(i, a)| a.matched.is_none() && !state.matched_now.contains(i))
            .count();
        state.report.elapsed = start.elapsed();
        state.report.log();
        Ok(state.report)
    }

    /// Returns authors whose ORCID is not among the candidates.
    async fn orcid_pass(&self, state: &mut RunState, candidates: &Candidates) -> Result<Vec<usize>> {
        let mut unresolved = Vec::new();
        for i in 0..state.authors.len() {
            if !state.is_open(i, MatchMethod::Orcid) {
                continue;
            }
            let Some(orcid) = state.authors[i].orcid.as_deref() else {
                continue;
            };
            match candidates.by_orcid.get(orcid) {
                Some(&c) => {
                    self.accept(state, i, &candidates.list[c], MatchMethod::Orcid, 1.0)
                        .await?
                }
                None => unresolved.push(i),
            }
        }
        Ok(unresolved)
    }

    async fn scopus_pass(&self, state: &mut RunState, candidates: &Candidates) -> Result<()> {
        for i in 0..state.authors.len() {
            if !state.is_open(i, MatchMethod::Scopus) {
                continue;
            }
            let hit = state.authors[i]
                .scopus_id
                .as_deref()
                .and_then(|s| candidates.by_scopus.get(s).copied());
            if let Some(c) = hit {
                self.accept(state, i, &candidates.list[c], MatchMethod::Scopus, 1.0)
                    .await?;
            }
        }
        Ok(())
    }

    async fn name_pass(&self, state: &mut RunState, candidates: &Candidates) -> Result<()> {
        if candidates.names.is_empty() {
            return Ok(());
        }
        let threshold = self.settings.name_threshold;
        for i in 0..state.authors.len() {
            let author = &state.authors[i];
            if author.has_identifier() || !state.is_open(i, MatchMethod::Name) {
                continue;
            }
            let Some(name) = author.display_name.clone() else {
                continue;
            };
            let ambiguous = surname(&name)
                .is_some_and(|s| self.settings.ambiguous_surnames.iter().any(|d| *d == s));
            if ambiguous {
                log::debug!("{}: ambiguous surname in {name:?}, not name-matching", author.key);
                state.report.ambiguous += 1;
                continue;
            }
            match candidates.names.best(&name) {
                Some((c, score)) if score >= threshold => {
                    self.accept(state, i, &candidates.list[c], MatchMethod::Name, score)
                        .await?
                }
                Some((c, score)) => log::debug!(
                    "{}: best name candidate {:?} at {score:.3} below {threshold}",
                    state.authors[i].key,
                    candidates.list[c].display_name
                ),
                None => {}
            }
        }
        Ok(())
    }

    async fn accept(
        &self,
        state: &mut RunState,
        i: usize,
        candidate: &Candidate,
        method: MatchMethod,
        score: f64,
    ) -> Result<()> {
        let m = AuthorMatch {
            key: state.authors[i].key.clone(),
            external_id: candidate.id.clone(),
            display_name: candidate.display_name.clone(),
            method,
            score,
        };
        self.store
            .update_fields(&self.settings.repository_authors, &m.key, m.fields())
            .await
            .with_context(|| format!("writing match for {}", m.key))?;
        log::debug!("{} -> {} by {method} ({score:.3})", m.key, m.external_id);

        state.matched_now.insert(i);
        match method {
            MatchMethod::Orcid => state.report.by_orcid += 1,
            MatchMethod::Scopus => state.report.by_scopus += 1,
            MatchMethod::Name => state.report.by_name += 1,
        }
        state.report.matches.push(m);
        Ok(())
    }
}
