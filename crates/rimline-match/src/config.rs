/// Surnames shared by so many researchers that a name-only match on them
/// is unreliable.
pub const DEFAULT_AMBIGUOUS_SURNAMES: &[&str] = &[
    "wang", "zhang", "li", "liu", "chen", "yang", "huang", "zhao", "wu", "zhou", "xu", "sun",
    "ma", "zhu", "hu", "guo", "he", "lin", "kim", "lee", "park", "nguyen",
];

/// Field paths read from repository author records.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorFields {
    pub orcid: String,
    pub scopus_id: String,
    pub isni: String,
    pub display_name: String,
}

impl Default for AuthorFields {
    fn default() -> Self {
        Self {
            orcid: "orcid".to_string(),
            scopus_id: "scopus_id".to_string(),
            isni: "isni".to_string(),
            display_name: "display_name".to_string(),
        }
    }
}

/// Configuration for the author and work matchers.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSettings {
    pub repository_authors: String,
    pub graph_authors: String,
    pub repository_works: String,
    pub graph_works: String,
    pub author_fields: AuthorFields,
    /// Minimum cosine similarity for a name-only match
    pub name_threshold: f64,
    /// Lower-case surnames excluded from name-only matching
    pub ambiguous_surnames: Vec<String>,
    /// Ask the graph for unresolved ORCIDs / DOIs and re-check once
    pub backfill: bool,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            repository_authors: "repository_authors".to_string(),
            graph_authors: "authors".to_string(),
            repository_works: "repository_works".to_string(),
            graph_works: "works".to_string(),
            author_fields: AuthorFields::default(),
            name_threshold: 0.8,
            ambiguous_surnames: DEFAULT_AMBIGUOUS_SURNAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            backfill: true,
        }
    }
}
