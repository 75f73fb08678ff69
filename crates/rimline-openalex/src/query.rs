//! Filter queries: identifier batches and institution/year defaults

use std::collections::HashSet;
use std::fmt;

use rimline_core::ids::{IdError, normalize_doi, normalize_ror, orcid_url, short_id};

use crate::entity::Entity;

/// Most identifiers OR-ed into one filter value
pub const MAX_BATCH: usize = 50;

/// Characters with meaning inside a filter expression
const FILTER_DELIMITERS: [char; 2] = ['|', ','];

/// Kind of identifier in an explicit ID list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    /// OpenAlex ID, full URL or short form
    OpenAlex,
    Doi,
    Orcid,
    Ror,
}

impl IdType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "openalex" | "id" => Some(Self::OpenAlex),
            "doi" => Some(Self::Doi),
            "orcid" => Some(Self::Orcid),
            "ror" => Some(Self::Ror),
            _ => None,
        }
    }

    /// Filter attribute selecting `entity` records by this identifier.
    pub fn filter_key(&self, entity: Entity) -> Option<&'static str> {
        match (self, entity) {
            (Self::OpenAlex, _) => Some("ids.openalex"),
            (Self::Doi, Entity::Works) => Some("doi"),
            (Self::Orcid, Entity::Authors) => Some("orcid"),
            (Self::Orcid, Entity::Works) => Some("authorships.author.orcid"),
            (Self::Ror, Entity::Institutions) => Some("ror"),
            (Self::Ror, Entity::Works) => Some("institutions.ror"),
            _ => None,
        }
    }

    /// Canonical filter value for one identifier.
    pub fn normalize(&self, raw: &str) -> Result<String, IdError> {
        match self {
            Self::OpenAlex => Ok(short_id(raw.trim()).to_string()),
            Self::Doi => normalize_doi(raw),
            Self::Orcid => orcid_url(raw),
            Self::Ror => normalize_ror(raw),
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenAlex => "openalex",
            Self::Doi => "doi",
            Self::Orcid => "orcid",
            Self::Ror => "ror",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The identifier type cannot select this entity
    Unsupported { id_type: IdType, entity: Entity },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported { id_type, entity } => {
                write!(f, "cannot filter {entity} by {id_type}")
            }
        }
    }
}

impl std::error::Error for QueryError {}

/// One filter query, drained to completion by cursor pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphQuery {
    pub entity: Entity,
    pub filter: String,
    /// Short description for logs
    pub label: String,
}

/// Deduplicate (first occurrence wins) and split into groups of at most
/// [`MAX_BATCH`]. The last group may be smaller.
pub fn batch_ids<I>(ids: I) -> Vec<Vec<String>>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let unique: Vec<String> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
    unique.chunks(MAX_BATCH).map(<[String]>::to_vec).collect()
}

/// Batched queries for an explicit identifier list.
///
/// Identifiers that fail to normalize or contain filter delimiters are
/// dropped with a warning.
pub fn id_queries<I>(entity: Entity, id_type: IdType, ids: I) -> Result<Vec<GraphQuery>, QueryError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let key = id_type
        .filter_key(entity)
        .ok_or(QueryError::Unsupported { id_type, entity })?;

    let values = ids.into_iter().filter_map(|raw| {
        let raw = raw.as_ref();
        match id_type.normalize(raw) {
            Ok(v) if v.contains(FILTER_DELIMITERS) => {
                log::warn!("{entity}: dropping {id_type} {v:?}: contains a filter delimiter");
                None
            }
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("{entity}: dropping {e}");
                None
            }
        }
    });

    let batches = batch_ids(values);
    let total = batches.len();
    Ok(batches
        .into_iter()
        .enumerate()
        .map(|(i, batch)| GraphQuery {
            entity,
            filter: format!("{key}:{}", batch.join("|")),
            label: format!("{entity} by {id_type} {}/{total}", i + 1),
        })
        .collect())
}

/// Institution filter term: ROR IDs match on `institutions.ror`, anything
/// else is taken as an OpenAlex institution ID.
fn institution_term(institution: &str) -> String {
    match normalize_ror(institution) {
        Ok(ror) => format!("institutions.ror:{ror}"),
        Err(_) => format!("institutions.id:{}", short_id(institution.trim())),
    }
}

/// Default works queries: one per institution per publication year.
pub fn institution_year_queries(institutions: &[String], years: &[i32]) -> Vec<GraphQuery> {
    institutions
        .iter()
        .flat_map(|inst| {
            let term = institution_term(inst);
            years.iter().map(move |year| GraphQuery {
                entity: Entity::Works,
                filter: format!("{term},publication_year:{year}"),
                label: format!("works {} {year}", short_id(inst.trim())),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("W{i}")).collect()
    }

    #[test]
    fn batch_count_is_ceiling() {
        for len in [0usize, 1, 49, 50, 51, 100, 101, 237] {
            let batches = batch_ids(ids(len));
            assert_eq!(batches.len(), len.div_ceil(MAX_BATCH), "len {len}");
            assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= MAX_BATCH));
            let flat: Vec<String> = batches.into_iter().flatten().collect();
            assert_eq!(flat, ids(len));
        }
    }

    #[test]
    fn batch_drops_duplicates() {
        let input = vec!["a".to_string(), "b".into(), "a".into(), "c".into(), "b".into()];
        assert_eq!(batch_ids(input), vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn doi_queries_normalize_and_join() {
        let queries = id_queries(
            Entity::Works,
            IdType::Doi,
            ["10.1/A", "doi:10.2/b", "https://doi.org/10.1/a"],
        )
        .unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(
            queries[0].filter,
            "doi:https://doi.org/10.1/a|https://doi.org/10.2/b"
        );
    }

    #[test]
    fn delimiter_values_dropped() {
        let queries =
            id_queries(Entity::Works, IdType::Doi, ["10.1/a,b", "10.1/c|d", "10.1/ok"]).unwrap();
        assert_eq!(queries[0].filter, "doi:https://doi.org/10.1/ok");
    }

    #[test]
    fn invalid_ids_dropped() {
        let queries = id_queries(Entity::Authors, IdType::Orcid, ["nope", "0000-0002-1825-0097"])
            .unwrap();
        assert_eq!(
            queries[0].filter,
            "orcid:https://orcid.org/0000-0002-1825-0097"
        );
    }

    #[test]
    fn openalex_ids_shortened() {
        let queries = id_queries(
            Entity::Authors,
            IdType::OpenAlex,
            ["https://openalex.org/A1", "A2"],
        )
        .unwrap();
        assert_eq!(queries[0].filter, "ids.openalex:A1|A2");
    }

    #[test]
    fn large_list_batched() {
        let queries = id_queries(Entity::Authors, IdType::OpenAlex, ids(120)).unwrap();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[2].filter.matches('|').count(), 19);
        assert_eq!(queries[0].label, "authors by openalex 1/3");
    }

    #[test]
    fn unsupported_combination() {
        let err = id_queries(Entity::Topics, IdType::Doi, ["10.1/a"]).unwrap_err();
        assert_eq!(err.to_string(), "cannot filter topics by doi");
    }

    #[test]
    fn institution_year_defaults() {
        let queries = institution_year_queries(
            &["I123".to_string(), "https://ror.org/04pp8hn57".to_string()],
            &[2022, 2023],
        );
        let filters: Vec<&str> = queries.iter().map(|q| q.filter.as_str()).collect();
        assert_eq!(
            filters,
            vec![
                "institutions.id:I123,publication_year:2022",
                "institutions.id:I123,publication_year:2023",
                "institutions.ror:https://ror.org/04pp8hn57,publication_year:2022",
                "institutions.ror:https://ror.org/04pp8hn57,publication_year:2023",
            ]
        );
    }
}
