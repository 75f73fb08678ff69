//! OpenAlex harvest configuration

use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openalex.org";
pub const DEFAULT_PER_PAGE: u32 = 25;

/// Runtime configuration for OpenAlex harvests
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAlexSettings {
    pub base_url: String,
    /// Contact address sent as `mailto` (polite pool)
    pub mailto: Option<String>,
    pub api_key: Option<String>,
    /// OpenAlex institution IDs or ROR IDs scoping the default works query
    pub institutions: Vec<String>,
    /// Publication years for the default works query
    pub years: Vec<i32>,
    /// Default page size; halved on transient errors
    pub per_page: u32,
    /// Transient retries per page before the query is abandoned
    pub max_page_retries: u32,
    /// First backoff sleep between page retries; doubles per attempt
    pub retry_base_delay: Duration,
}

impl Default for OpenAlexSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            mailto: None,
            api_key: None,
            institutions: Vec::new(),
            years: Vec::new(),
            per_page: DEFAULT_PER_PAGE,
            max_page_retries: 5,
            retry_base_delay: Duration::from_secs(2),
        }
    }
}
