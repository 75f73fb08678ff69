//! rimline-openalex: scholarly-graph harvesting from OpenAlex
//!
//! Builds filter queries (batched ID lists or institution/year defaults),
//! derives entity IDs from harvested works, and drains each query with
//! cursor pagination that shrinks the page size under transient errors.

pub mod backfill;
pub mod client;
pub mod config;
pub mod entity;
pub mod harvest;
pub mod paginate;
pub mod query;
pub mod refs;

pub use backfill::OpenAlexBackfill;
pub use client::{OpenAlexClient, Page};
pub use config::OpenAlexSettings;
pub use entity::Entity;
pub use harvest::{OpenAlexHarvest, derived_queries, drain_query};
pub use paginate::Paginator;
pub use query::{GraphQuery, IdType, MAX_BATCH, QueryError, batch_ids, id_queries};
