//! OpenAlex as a harvest source.
//!
//! Works are queried by institution and publication year. Every other
//! entity is derived: IDs referenced by stored works, minus the ones already
//! in the entity's collection, batched into ID-list filters.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rimline_core::{FetchError, Harvest, HarvestContext, RetryPolicy, SourceRecord, short_id};
use rimline_store::{Document, DocumentStore, Filter};
use serde_json::Value;

use crate::client::{OpenAlexClient, is_pagination_exhausted};
use crate::entity::Entity;
use crate::paginate::{Backoff, Paginator};
use crate::query::{GraphQuery, IdType, id_queries, institution_year_queries};
use crate::refs;

pub struct OpenAlexHarvest {
    client: Arc<OpenAlexClient>,
    entity: Entity,
    name: String,
}

impl OpenAlexHarvest {
    pub fn new(client: Arc<OpenAlexClient>, entity: Entity) -> Self {
        Self {
            client,
            entity,
            name: format!("openalex-{entity}"),
        }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }
}

#[async_trait]
impl Harvest for OpenAlexHarvest {
    type Item = GraphQuery;

    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self) -> &str {
        self.entity.collection()
    }

    fn indexes(&self) -> Vec<String> {
        self.entity.indexes().iter().map(|f| f.to_string()).collect()
    }

    async fn default_items(&self, store: &dyn DocumentStore) -> Result<Vec<GraphQuery>> {
        if self.entity.is_derived() {
            return derived_queries(store, self.entity).await;
        }
        let settings = self.client.settings();
        if settings.institutions.is_empty() || settings.years.is_empty() {
            log::warn!("{}: no institutions or years configured, nothing to query", self.name);
            return Ok(Vec::new());
        }
        Ok(institution_year_queries(&settings.institutions, &settings.years))
    }

    async fn fetch(&self, query: &GraphQuery, ctx: &HarvestContext) -> Result<Vec<SourceRecord>, FetchError> {
        let records = drain_query(&self.client, query, ctx).await?;
        log::debug!("{}: {} records", query.label, records);
        Ok(Vec::new())
    }
}

/// ID-list queries for the `entity` references in stored works that are not
/// yet in `entity`'s collection.
pub async fn derived_queries(store: &dyn DocumentStore, entity: Entity) -> Result<Vec<GraphQuery>> {
    let works = store
        .find_many(Entity::Works.collection(), &Filter::all(), refs::projection(entity))
        .await?;
    let referenced = refs::derive_ids(entity, works.iter().map(|r| &r.doc));

    let have = store.keys(entity.collection()).await?;
    let have: HashSet<&str> = have.iter().map(|k| short_id(k)).collect();
    let missing: Vec<&String> = referenced
        .iter()
        .filter(|id| !have.contains(short_id(id)))
        .collect();

    log::info!(
        "{entity}: {} referenced by {} works, {} not yet harvested",
        referenced.len(),
        works.len(),
        missing.len()
    );
    Ok(id_queries(entity, IdType::OpenAlex, missing)?)
}

fn to_records(results: Vec<Document>) -> Vec<SourceRecord> {
    results
        .into_iter()
        .filter_map(|doc| {
            let key = doc.get("id").and_then(Value::as_str).map(str::to_string);
            match key {
                Some(key) => Some(SourceRecord::map(key, doc)),
                None => {
                    log::warn!("dropping result without id");
                    None
                }
            }
        })
        .collect()
}

/// Page through `query` to the end, persisting each page before requesting
/// the next. Returns the number of records written.
pub async fn drain_query(
    client: &OpenAlexClient,
    query: &GraphQuery,
    ctx: &HarvestContext,
) -> Result<usize, FetchError> {
    let settings = client.settings();
    let mut pager = Paginator::new(settings.per_page, settings.max_page_retries);
    let backoff = RetryPolicy {
        max_retries: settings.max_page_retries,
        base_delay: settings.retry_base_delay,
    };
    let mut written = 0usize;

    while let Some(request) = pager.next_request() {
        match client.fetch_page(query, &request).await {
            Ok(page) => {
                let returned = page.results.len();
                let records = to_records(page.results);
                written += records.len();
                ctx.persist(records).await?;
                pager.on_page(page.next_cursor, returned);
            }
            Err(e) if is_pagination_exhausted(&e) => {
                log::debug!("{}: pagination exhausted after {} pages", query.label, pager.pages());
                pager.on_exhausted();
            }
            Err(e) if e.is_transient() => match pager.on_transient() {
                Backoff::Retry { attempt, per_page } => {
                    let delay = backoff.backoff(attempt);
                    log::debug!(
                        "{}: {e}, retry {attempt} with per-page {per_page} in {delay:?}",
                        query.label
                    );
                    tokio::time::sleep(delay).await;
                }
                Backoff::GiveUp => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}
