//! rimline-match: entity resolution between repository and graph records
//!
//! Authors resolve through an identifier cascade (ORCID, Scopus, ISNI) with a
//! TF-IDF name fallback; works resolve by DOI, graph ID or repository ID
//! equality. Both matchers write cross-references back onto the records and
//! can ask a [`rimline_core::GraphBackfill`] for records missing on the graph side.

pub mod author;
pub mod config;
pub mod tfidf;
pub mod work;

pub use author::{AuthorIdentity, AuthorMatch, AuthorMatchReport, AuthorMatcher, MatchMethod};
pub use config::{AuthorFields, DEFAULT_AMBIGUOUS_SURNAMES, MatchSettings};
pub use tfidf::NameIndex;
pub use work::{WorkIdentity, WorkKey, WorkMatch, WorkMatchReport, WorkMatcher, same_work};
