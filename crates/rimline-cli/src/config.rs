//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rimline_core::{HarvestSettings, OAuthSettings, RetryPolicy};
use rimline_match::{AuthorFields, MatchSettings};
use rimline_openalex::OpenAlexSettings;
use rimline_sources::{LookupSettings, OaiSettings};
use serde::Deserialize;

/// Global configuration for rimline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub http: HttpConfig,
    pub throttle: ThrottleConfig,
    pub openalex: OpenAlexConfig,
    pub oai: OaiConfig,
    pub lookups: Vec<LookupConfig>,
    pub matching: MatchingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    pub timeout: u64,
    pub max_retries: u32,
    /// First retry delay in milliseconds, doubled per attempt
    pub retry_base_delay_ms: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: 60,
            max_retries: 5,
            retry_base_delay_ms: 2000,
            user_agent: concat!("rimline/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub max_at_once: usize,
    pub max_per_second: u32,
    pub flush_size: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        let d = HarvestSettings::default();
        Self {
            max_at_once: d.max_at_once,
            max_per_second: d.max_per_second,
            flush_size: d.flush_size,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAlexConfig {
    pub base_url: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub mailto: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
    /// OpenAlex institution IDs or ROR IDs
    pub institutions: Vec<String>,
    pub years: Vec<i32>,
    pub per_page: u32,
    pub max_page_retries: u32,
}

impl Default for OpenAlexConfig {
    fn default() -> Self {
        let d = OpenAlexSettings::default();
        Self {
            base_url: d.base_url,
            mailto: None,
            api_key: std::env::var("OPENALEX_API_KEY").ok(),
            institutions: Vec::new(),
            years: Vec::new(),
            per_page: d.per_page,
            max_page_retries: d.max_page_retries,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OaiConfig {
    pub base_url: String,
    pub metadata_prefix: String,
    pub sets: Vec<String>,
    /// Lower datestamp bound (YYYY-MM-DD)
    pub from: Option<String>,
    pub collection: String,
}

impl Default for OaiConfig {
    fn default() -> Self {
        let d = OaiSettings::default();
        Self {
            base_url: d.base_url,
            metadata_prefix: d.metadata_prefix,
            sets: d.sets,
            from: d.from,
            collection: d.collection,
        }
    }
}

/// One `[[lookups]]` entry: a per-DOI REST source.
#[derive(Debug, Clone, Deserialize)]
pub struct LookupConfig {
    pub name: String,
    pub base_url: String,
    /// Target collection, defaults to the lookup name
    pub collection: Option<String>,
    #[serde(default = "default_source_collection")]
    pub source_collection: String,
    #[serde(default = "default_source_field")]
    pub source_field: String,
    pub auth: Option<AuthConfig>,
}

fn default_source_collection() -> String {
    "works".to_string()
}

fn default_source_field() -> String {
    "doi".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub token_url: String,
    #[serde(default, deserialize_with = "deserialize_env_var")]
    pub client_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_env_var")]
    pub client_secret: Option<String>,
    #[serde(default, deserialize_with = "deserialize_env_var")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_refresh_after")]
    pub refresh_after_secs: u64,
}

fn default_refresh_after() -> u64 {
    rimline_core::auth::DEFAULT_REFRESH_AFTER.as_secs()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub repository_authors: String,
    pub graph_authors: String,
    pub repository_works: String,
    pub graph_works: String,
    pub orcid_field: String,
    pub scopus_field: String,
    pub isni_field: String,
    pub name_field: String,
    pub name_threshold: f64,
    pub ambiguous_surnames: Vec<String>,
    pub backfill: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        let d = MatchSettings::default();
        Self {
            repository_authors: d.repository_authors,
            graph_authors: d.graph_authors,
            repository_works: d.repository_works,
            graph_works: d.graph_works,
            orcid_field: d.author_fields.orcid,
            scopus_field: d.author_fields.scopus_id,
            isni_field: d.author_fields.isni,
            name_field: d.author_fields.display_name,
            name_threshold: d.name_threshold,
            ambiguous_surnames: d.ambiguous_surnames,
            backfill: d.backfill,
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./rimline.toml (current directory)
    /// 2. ~/.config/rimline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("rimline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "rimline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn harvest_settings(&self) -> HarvestSettings {
        HarvestSettings {
            max_at_once: self.throttle.max_at_once,
            max_per_second: self.throttle.max_per_second,
            flush_size: self.throttle.flush_size,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.http.max_retries,
            base_delay: Duration::from_millis(self.http.retry_base_delay_ms),
        }
    }

    pub fn openalex_settings(&self) -> OpenAlexSettings {
        let oa = &self.openalex;
        OpenAlexSettings {
            base_url: oa.base_url.clone(),
            mailto: oa.mailto.clone(),
            api_key: oa.api_key.clone(),
            institutions: oa.institutions.clone(),
            years: oa.years.clone(),
            per_page: oa.per_page,
            max_page_retries: oa.max_page_retries,
            retry_base_delay: Duration::from_millis(self.http.retry_base_delay_ms),
        }
    }

    pub fn oai_settings(&self) -> OaiSettings {
        OaiSettings {
            base_url: self.oai.base_url.clone(),
            metadata_prefix: self.oai.metadata_prefix.clone(),
            sets: self.oai.sets.clone(),
            from: self.oai.from.clone(),
            collection: self.oai.collection.clone(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&LookupConfig> {
        self.lookups.iter().find(|l| l.name == name)
    }

    pub fn match_settings(&self) -> MatchSettings {
        let m = &self.matching;
        MatchSettings {
            repository_authors: m.repository_authors.clone(),
            graph_authors: m.graph_authors.clone(),
            repository_works: m.repository_works.clone(),
            graph_works: m.graph_works.clone(),
            author_fields: AuthorFields {
                orcid: m.orcid_field.clone(),
                scopus_id: m.scopus_field.clone(),
                isni: m.isni_field.clone(),
                display_name: m.name_field.clone(),
            },
            name_threshold: m.name_threshold,
            ambiguous_surnames: m.ambiguous_surnames.iter().map(|s| s.to_lowercase()).collect(),
            backfill: m.backfill,
        }
    }
}

impl LookupConfig {
    /// Harvest settings for this lookup; a configured `auth` block must have
    /// every credential resolved.
    pub fn settings(&self) -> Result<LookupSettings> {
        let auth = match &self.auth {
            Some(auth) => Some(auth.settings().with_context(|| format!("lookup {}", self.name))?),
            None => None,
        };
        Ok(LookupSettings {
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            collection: self.collection.clone().unwrap_or_else(|| self.name.clone()),
            source_collection: self.source_collection.clone(),
            source_field: self.source_field.clone(),
            auth,
        })
    }
}

impl AuthConfig {
    fn settings(&self) -> Result<OAuthSettings> {
        let required = |value: &Option<String>, field: &str| {
            value
                .clone()
                .with_context(|| format!("auth.{field} is missing or its variable is unset"))
        };
        Ok(OAuthSettings {
            token_url: self.token_url.clone(),
            client_id: required(&self.client_id, "client_id")?,
            client_secret: required(&self.client_secret, "client_secret")?,
            refresh_token: required(&self.refresh_token, "refresh_token")?,
            refresh_after: Duration::from_secs(self.refresh_after_secs),
        })
    }
}
