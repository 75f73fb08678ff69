//! OpenAlex entity types

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    /// Papers, datasets, theses
    Works,
    Authors,
    /// Journals, repositories, conferences
    Sources,
    Institutions,
    Publishers,
    /// Research topics (hierarchical classification)
    Topics,
    Funders,
}

impl Entity {
    /// Parse entity from its name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "works" => Some(Self::Works),
            "authors" => Some(Self::Authors),
            "sources" => Some(Self::Sources),
            "institutions" => Some(Self::Institutions),
            "publishers" => Some(Self::Publishers),
            "topics" => Some(Self::Topics),
            "funders" => Some(Self::Funders),
            _ => None,
        }
    }

    /// API path segment, also the store collection name
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Works => "works",
            Self::Authors => "authors",
            Self::Sources => "sources",
            Self::Institutions => "institutions",
            Self::Publishers => "publishers",
            Self::Topics => "topics",
            Self::Funders => "funders",
        }
    }

    pub fn collection(&self) -> &'static str {
        self.endpoint()
    }

    /// Fields looked up by exact value elsewhere (matchers, backfill checks).
    pub fn indexes(&self) -> &'static [&'static str] {
        match self {
            Self::Works => &["doi"],
            Self::Authors => &["orcid"],
            Self::Institutions => &["ror"],
            Self::Sources | Self::Publishers | Self::Topics | Self::Funders => &[],
        }
    }

    /// Leading letter of the entity's short IDs (`W123`, `A456`, ...)
    pub fn id_prefix(&self) -> char {
        match self {
            Self::Works => 'W',
            Self::Authors => 'A',
            Self::Sources => 'S',
            Self::Institutions => 'I',
            Self::Publishers => 'P',
            Self::Topics => 'T',
            Self::Funders => 'F',
        }
    }

    /// Everything except works is derived from harvested works.
    pub fn is_derived(&self) -> bool {
        !matches!(self, Self::Works)
    }

    pub fn all() -> &'static [Entity] {
        &[
            Self::Works,
            Self::Authors,
            Self::Sources,
            Self::Institutions,
            Self::Publishers,
            Self::Topics,
            Self::Funders,
        ]
    }

    pub fn derived() -> &'static [Entity] {
        &Self::all()[1..]
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}
