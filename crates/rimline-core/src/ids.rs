//! Persistent identifier normalization (DOI, ORCID, ROR, OpenAlex IDs)

const DOI_URL: &str = "https://doi.org/";
const ORCID_URL: &str = "https://orcid.org/";
const ROR_URL: &str = "https://ror.org/";

/// Prefixes stripped before a DOI is validated (matched case-insensitively).
const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi.org/",
    "dx.doi.org/",
    "doi:",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    InvalidDoi(String),
    InvalidOrcid(String),
    InvalidRor(String),
}

impl std::fmt::Display for IdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDoi(s) => write!(f, "not a DOI: {s:?}"),
            Self::InvalidOrcid(s) => write!(f, "not an ORCID: {s:?}"),
            Self::InvalidRor(s) => write!(f, "not a ROR id: {s:?}"),
        }
    }
}

impl std::error::Error for IdError {}

/// Normalize a DOI to `https://doi.org/<lowercase suffix>`.
///
/// Accepts bare `10.x/y`, `doi:` and any doi.org / dx.doi.org URL form.
pub fn normalize_doi(input: &str) -> Result<String, IdError> {
    let lowered = input.trim().to_lowercase();
    let mut rest = lowered.as_str();
    for prefix in DOI_PREFIXES {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped.trim_start();
            break;
        }
    }
    let valid = rest
        .strip_prefix("10.")
        .and_then(|r| r.split_once('/'))
        .is_some_and(|(registrant, suffix)| {
            !registrant.is_empty() && !suffix.trim().is_empty()
        });
    if !valid || rest.chars().any(char::is_whitespace) {
        return Err(IdError::InvalidDoi(input.to_string()));
    }
    Ok(format!("{DOI_URL}{rest}"))
}

/// Normalize an ORCID to its bare `XXXX-XXXX-XXXX-XXXX` form (upper-case check digit).
pub fn normalize_orcid(input: &str) -> Result<String, IdError> {
    let trimmed = input.trim();
    let bare = trimmed
        .strip_prefix(ORCID_URL)
        .or_else(|| trimmed.strip_prefix("http://orcid.org/"))
        .or_else(|| trimmed.strip_prefix("orcid.org/"))
        .unwrap_or(trimmed)
        .to_uppercase();

    let groups: Vec<&str> = bare.split('-').collect();
    let well_formed = groups.len() == 4
        && groups.iter().all(|g| g.len() == 4)
        && groups[..3]
            .iter()
            .all(|g| g.chars().all(|c| c.is_ascii_digit()))
        && groups[3]
            .char_indices()
            .all(|(i, c)| c.is_ascii_digit() || (i == 3 && c == 'X'));
    if !well_formed {
        return Err(IdError::InvalidOrcid(input.to_string()));
    }
    Ok(bare)
}

/// ORCID as a full `https://orcid.org/...` URL.
pub fn orcid_url(input: &str) -> Result<String, IdError> {
    normalize_orcid(input).map(|bare| format!("{ORCID_URL}{bare}"))
}

/// Normalize a ROR identifier to `https://ror.org/<id>`.
pub fn normalize_ror(input: &str) -> Result<String, IdError> {
    let lowered = input.trim().to_lowercase();
    let bare = lowered
        .strip_prefix(ROR_URL)
        .or_else(|| lowered.strip_prefix("http://ror.org/"))
        .or_else(|| lowered.strip_prefix("ror.org/"))
        .unwrap_or(&lowered);
    if bare.len() != 9 || !bare.starts_with('0') || !bare.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(IdError::InvalidRor(input.to_string()));
    }
    Ok(format!("{ROR_URL}{bare}"))
}

/// Extract the short ID from a full OpenAlex URL (`https://openalex.org/W123` → `W123`).
pub fn short_id(url: &str) -> &str {
    url.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(url)
}
