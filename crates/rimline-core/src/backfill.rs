//! Follow-up graph harvests requested by the matchers

use anyhow::Result;
use async_trait::async_trait;

/// Fetches missing graph records by identifier into the store.
///
/// Both methods return the number of records written; identifiers the graph
/// does not know are not an error.
#[async_trait]
pub trait GraphBackfill: Send + Sync {
    /// Harvest works by normalized DOI.
    async fn works_by_doi(&self, dois: &[String]) -> Result<usize>;

    /// Harvest authors by bare ORCID.
    async fn authors_by_orcid(&self, orcids: &[String]) -> Result<usize>;
}

/// Backfill that never fetches anything (offline matching).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackfill;

#[async_trait]
impl GraphBackfill for NoBackfill {
    async fn works_by_doi(&self, _dois: &[String]) -> Result<usize> {
        Ok(0)
    }

    async fn authors_by_orcid(&self, _orcids: &[String]) -> Result<usize> {
        Ok(0)
    }
}
