//! rimline-sources: non-graph harvesters
//!
//! The institutional repository over OAI-PMH, and per-DOI REST lookups
//! against enrichment services (DOI registries, citation indexes, OA deal
//! catalogs), optionally behind OAuth refresh tokens.

pub mod listrecords;
pub mod lookup;
pub mod oai;

pub use listrecords::{ListRecordsPage, OaiRecord, extract_fields, parse_list_records};
pub use lookup::{LookupHarvest, LookupSettings};
pub use oai::{OaiHarvest, OaiRequest, OaiSettings};
