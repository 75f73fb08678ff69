//! Graph backfill through batched ID queries

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rimline_core::{GraphBackfill, Harvester};

use crate::client::OpenAlexClient;
use crate::entity::Entity;
use crate::harvest::OpenAlexHarvest;
use crate::query::{IdType, id_queries};

/// Fetches works by DOI and authors by ORCID on behalf of the matchers.
pub struct OpenAlexBackfill {
    client: Arc<OpenAlexClient>,
    harvester: Harvester,
}

impl OpenAlexBackfill {
    pub fn new(client: Arc<OpenAlexClient>, harvester: Harvester) -> Self {
        Self { client, harvester }
    }

    async fn harvest_ids(&self, entity: Entity, id_type: IdType, ids: &[String]) -> Result<usize> {
        let queries = id_queries(entity, id_type, ids)?;
        if queries.is_empty() {
            return Ok(0);
        }
        log::info!("backfill: {} {entity} by {id_type} in {} queries", ids.len(), queries.len());
        let source = OpenAlexHarvest::new(Arc::clone(&self.client), entity);
        let summary = self.harvester.run(&source, queries).await?;
        Ok(summary.records)
    }
}

#[async_trait]
impl GraphBackfill for OpenAlexBackfill {
    async fn works_by_doi(&self, dois: &[String]) -> Result<usize> {
        self.harvest_ids(Entity::Works, IdType::Doi, dois).await
    }

    async fn authors_by_orcid(&self, orcids: &[String]) -> Result<usize> {
        self.harvest_ids(Entity::Authors, IdType::Orcid, orcids).await
    }
}
