//! Per-DOI REST lookups (DOI registries, citation indexes, OA deal catalogs).
//!
//! The default item list is every DOI in the source collection that has no
//! record yet in the lookup's own collection. Misses are stored as stubs, so
//! a re-run only asks about DOIs that appeared since.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rimline_core::{
    FailurePolicy, FetchError, Harvest, HarvestContext, HttpRequest, HttpResponse, HttpTransport,
    OAuthSettings, RetryPolicy, SourceRecord, TokenCache, normalize_doi, retry_transient,
};
use rimline_store::{Document, DocumentStore, Filter};
use serde_json::Value;

const DOI_URL: &str = "https://doi.org/";

#[derive(Debug, Clone, PartialEq)]
pub struct LookupSettings {
    pub name: String,
    /// Endpoint prefix; the bare DOI is appended as the last path segment
    pub base_url: String,
    pub collection: String,
    pub source_collection: String,
    pub source_field: String,
    pub auth: Option<OAuthSettings>,
}

pub struct LookupHarvest {
    transport: Arc<dyn HttpTransport>,
    settings: LookupSettings,
    tokens: Option<TokenCache>,
    retry: RetryPolicy,
}

impl LookupHarvest {
    pub fn new(transport: Arc<dyn HttpTransport>, settings: LookupSettings, retry: RetryPolicy) -> Self {
        let tokens = settings
            .auth
            .clone()
            .map(|auth| TokenCache::new(Arc::clone(&transport), auth).with_retry(retry));
        Self {
            transport,
            settings,
            tokens,
            retry,
        }
    }

    fn request(&self, doi: &str) -> HttpRequest {
        let bare = doi.strip_prefix(DOI_URL).unwrap_or(doi);
        HttpRequest::get(format!(
            "{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            bare
        ))
    }

    async fn send_once(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        match &self.tokens {
            Some(tokens) => tokens.send(self.transport.as_ref(), request).await,
            None => self.transport.send(request).await,
        }
    }
}

#[async_trait]
impl Harvest for LookupHarvest {
    type Item = String;

    fn name(&self) -> &str {
        &self.settings.name
    }

    fn collection(&self) -> &str {
        &self.settings.collection
    }

    fn indexes(&self) -> Vec<String> {
        vec!["doi".to_string()]
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Stub
    }

    /// Refresh credentials before the first request so a bad refresh token
    /// aborts the run up front.
    async fn prepare(&self) -> Result<(), FetchError> {
        if let Some(tokens) = &self.tokens {
            tokens.bearer().await?;
        }
        Ok(())
    }

    async fn default_items(&self, store: &dyn DocumentStore) -> Result<Vec<String>> {
        let field = self.settings.source_field.as_str();
        let sources = store
            .find_many(
                &self.settings.source_collection,
                &Filter::all().exists(field),
                &[field],
            )
            .await?;
        let have: HashSet<String> = store.keys(&self.settings.collection).await?;

        let mut invalid = 0usize;
        let mut dois = BTreeSet::new();
        for record in &sources {
            match record.get_str(field).map(normalize_doi) {
                Some(Ok(doi)) if !have.contains(&doi) => {
                    dois.insert(doi);
                }
                Some(Ok(_)) => {}
                _ => invalid += 1,
            }
        }
        if invalid > 0 {
            log::debug!("{}: {invalid} source records without a usable DOI", self.settings.name);
        }
        Ok(dois.into_iter().collect())
    }

    async fn fetch(&self, doi: &String, _ctx: &HarvestContext) -> Result<Vec<SourceRecord>, FetchError> {
        let request = self.request(doi);
        let response = retry_transient(&self.settings.name, &self.retry, || {
            self.send_once(request.clone())
        })
        .await?;

        let mut doc = match serde_json::from_slice::<Value>(&response.body)? {
            Value::Object(doc) => doc,
            other => {
                let mut doc = Document::new();
                doc.insert("data".into(), other);
                doc
            }
        };
        doc.insert("doi".into(), Value::String(doi.clone()));
        Ok(vec![SourceRecord::map(doi.clone(), doc)])
    }

    fn item_key(&self, doi: &String) -> Option<String> {
        Some(doi.clone())
    }
}
