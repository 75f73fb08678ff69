//! Institutional repository harvest over OAI-PMH `ListRecords`.
//!
//! One item per configured set (or a single unscoped item). Each item
//! follows resumption tokens until the repository stops sending one,
//! persisting every page before requesting the next.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rimline_core::record::RAW_FIELD;
use rimline_core::{
    FetchError, Harvest, HarvestContext, HttpRequest, HttpTransport, RetryPolicy, SourceRecord,
    retry_transient,
};
use rimline_store::{Document, DocumentStore};
use serde_json::Value;

use crate::listrecords::{EXTRACTED_FIELDS, OaiRecord, extract_fields, parse_list_records};

#[derive(Debug, Clone, PartialEq)]
pub struct OaiSettings {
    pub base_url: String,
    pub metadata_prefix: String,
    /// Empty harvests the whole repository
    pub sets: Vec<String>,
    /// Lower datestamp bound (`YYYY-MM-DD`)
    pub from: Option<String>,
    pub collection: String,
}

impl Default for OaiSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            metadata_prefix: "oai_dc".to_string(),
            sets: Vec::new(),
            from: None,
            collection: "repository_works".to_string(),
        }
    }
}

/// One `ListRecords` chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OaiRequest {
    pub set: Option<String>,
}

pub struct OaiHarvest {
    transport: Arc<dyn HttpTransport>,
    settings: OaiSettings,
    retry: RetryPolicy,
}

impl OaiHarvest {
    pub fn new(transport: Arc<dyn HttpTransport>, settings: OaiSettings, retry: RetryPolicy) -> Self {
        Self {
            transport,
            settings,
            retry,
        }
    }

    /// First request of a chain carries the selection arguments; follow-ups
    /// carry only the resumption token.
    fn list_request(&self, item: &OaiRequest, token: Option<&str>) -> HttpRequest {
        let req = HttpRequest::get(self.settings.base_url.as_str()).query("verb", "ListRecords");
        if let Some(token) = token {
            return req.query("resumptionToken", token);
        }
        let mut req = req.query("metadataPrefix", self.settings.metadata_prefix.as_str());
        if let Some(set) = &item.set {
            req = req.query("set", set.as_str());
        }
        if let Some(from) = &self.settings.from {
            req = req.query("from", from.as_str());
        }
        req
    }
}

fn to_source_record(record: OaiRecord) -> SourceRecord {
    let mut fields = Document::new();
    fields.insert("identifier".into(), Value::String(record.identifier.clone()));
    if let Some(datestamp) = record.datestamp {
        fields.insert("datestamp".into(), Value::String(datestamp));
    }
    fields.insert(
        "sets".into(),
        Value::Array(record.sets.into_iter().map(Value::String).collect()),
    );
    fields.insert("deleted".into(), Value::Bool(record.deleted));

    match record.metadata {
        Some(metadata) if !record.deleted => {
            for (k, v) in extract_fields(&metadata) {
                fields.entry(k).or_insert(v);
            }
            // Drop values a revised record no longer carries
            for field in EXTRACTED_FIELDS {
                fields.entry(*field).or_insert(Value::Null);
            }
            SourceRecord::raw(record.identifier, fields, metadata)
        }
        _ => {
            if record.deleted {
                // Clear what an earlier harvest extracted
                for field in EXTRACTED_FIELDS.iter().chain([&RAW_FIELD]) {
                    fields.insert((*field).into(), Value::Null);
                }
            }
            SourceRecord::map(record.identifier, fields)
        }
    }
}

#[async_trait]
impl Harvest for OaiHarvest {
    type Item = OaiRequest;

    fn name(&self) -> &str {
        "oai"
    }

    fn collection(&self) -> &str {
        &self.settings.collection
    }

    fn indexes(&self) -> Vec<String> {
        vec!["doi".to_string()]
    }

    async fn prepare(&self) -> Result<(), FetchError> {
        if self.settings.base_url.is_empty() {
            return Err(FetchError::Fatal("oai: base_url is not configured".into()));
        }
        Ok(())
    }

    async fn default_items(&self, _store: &dyn DocumentStore) -> Result<Vec<OaiRequest>> {
        if self.settings.sets.is_empty() {
            return Ok(vec![OaiRequest { set: None }]);
        }
        Ok(self
            .settings
            .sets
            .iter()
            .map(|s| OaiRequest {
                set: Some(s.clone()),
            })
            .collect())
    }

    async fn fetch(&self, item: &OaiRequest, ctx: &HarvestContext) -> Result<Vec<SourceRecord>, FetchError> {
        let mut token: Option<String> = None;
        let mut pages = 0usize;
        let mut records = 0usize;
        loop {
            let request = self.list_request(item, token.as_deref());
            let response = retry_transient("oai ListRecords", &self.retry, || {
                self.transport.send(request.clone())
            })
            .await?;
            let page = parse_list_records(&response.text())?;
            pages += 1;
            records += page.records.len();
            ctx.persist(page.records.into_iter().map(to_source_record).collect())
                .await?;

            match page.resumption_token {
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    return Err(FetchError::Protocol(format!(
                        "resumption token {next:?} repeated"
                    )));
                }
                Some(next) => token = Some(next),
                None => break,
            }
        }
        log::debug!(
            "oai set {}: {records} records in {pages} pages",
            item.set.as_deref().unwrap_or("*")
        );
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rimline_core::{HarvestSettings, Harvester, HttpResponse};
    use rimline_store::MemoryStore;
    use std::sync::Mutex;

    struct Repo {
        pages: Mutex<Vec<Result<String, FetchError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl Repo {
        fn new(mut pages: Vec<Result<String, FetchError>>) -> Arc<Self> {
            pages.reverse();
            Arc::new(Self {
                pages: Mutex::new(pages),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for Repo {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
            self.requests.lock().unwrap().push(request);
            let next = self.pages.lock().unwrap().pop().expect("unexpected request");
            next.map(|body| HttpResponse {
                status: 200,
                body: body.into_bytes(),
            })
        }
    }

    fn page(ids: &[u32], token: Option<&str>) -> Result<String, FetchError> {
        let records: String = ids
            .iter()
            .map(|i| {
                format!(
                    "<record><header><identifier>oai:r:{i}</identifier><datestamp>2024-01-0{i}</datestamp></header>\
                     <metadata><dc><identifier>10.1/w{i}</identifier></dc></metadata></record>"
                )
            })
            .collect();
        let token = token
            .map(|t| format!("<resumptionToken>{t}</resumptionToken>"))
            .unwrap_or_default();
        Ok(format!("<OAI-PMH><ListRecords>{records}{token}</ListRecords></OAI-PMH>"))
    }

    fn settings(sets: &[&str]) -> OaiSettings {
        OaiSettings {
            base_url: "https://repo.example.org/oai".into(),
            sets: sets.iter().map(|s| s.to_string()).collect(),
            from: Some("2024-01-01".into()),
            ..OaiSettings::default()
        }
    }

    fn harvester(store: &Arc<MemoryStore>) -> Harvester {
        Harvester::new(
            store.clone(),
            HarvestSettings {
                max_at_once: 1,
                max_per_second: 0,
                flush_size: 100,
            },
        )
    }

    #[tokio::test]
    async fn follows_resumption_tokens() {
        let repo = Repo::new(vec![page(&[1, 2], Some("t1")), page(&[3], None)]);
        let store = Arc::new(MemoryStore::new());
        let oai = OaiHarvest::new(repo.clone(), settings(&[]), RetryPolicy::immediate(2));
        let summary = harvester(&store).run(&oai, Vec::new()).await.unwrap();
        assert_eq!(summary.records, 3);
        assert_eq!(store.count("repository_works").await.unwrap(), 3);

        let requests = repo.requests.lock().unwrap();
        assert_eq!(requests[0].query_value("metadataPrefix"), Some("oai_dc"));
        assert_eq!(requests[0].query_value("from"), Some("2024-01-01"));
        assert_eq!(requests[1].query_value("resumptionToken"), Some("t1"));
        assert_eq!(requests[1].query_value("metadataPrefix"), None);
        assert_eq!(requests[1].query_value("from"), None);
        assert_eq!(requests[1].query_value("verb"), Some("ListRecords"));

        let rec = store.get("repository_works", "oai:r:2").await.unwrap().unwrap();
        assert_eq!(rec["doi"], "https://doi.org/10.1/w2");
        assert_eq!(rec["deleted"], false);
        assert!(rec["raw"].as_str().unwrap().contains("10.1/w2"));
    }

    #[tokio::test]
    async fn one_chain_per_set() {
        let repo = Repo::new(vec![page(&[1], None), page(&[2], None)]);
        let store = Arc::new(MemoryStore::new());
        let oai = OaiHarvest::new(repo.clone(), settings(&["a", "b"]), RetryPolicy::immediate(2));
        let summary = harvester(&store).run(&oai, Vec::new()).await.unwrap();
        assert_eq!(summary.items, 2);
        let sets: Vec<String> = repo
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.query_value("set").unwrap().to_string())
            .collect();
        assert_eq!(sets, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn transient_error_retried() {
        let repo = Repo::new(vec![Err(FetchError::http(503, "busy")), page(&[1], None)]);
        let store = Arc::new(MemoryStore::new());
        let oai = OaiHarvest::new(repo.clone(), settings(&[]), RetryPolicy::immediate(2));
        let summary = harvester(&store).run(&oai, Vec::new()).await.unwrap();
        assert_eq!(summary.records, 1);
        assert_eq!(summary.skipped, 0);
    }

    #[tokio::test]
    async fn no_records_match_is_not_a_failure() {
        let repo = Repo::new(vec![Ok(
            r#"<OAI-PMH><error code="noRecordsMatch"/></OAI-PMH>"#.to_string()
        )]);
        let store = Arc::new(MemoryStore::new());
        let oai = OaiHarvest::new(repo, settings(&[]), RetryPolicy::immediate(0));
        let summary = harvester(&store).run(&oai, Vec::new()).await.unwrap();
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.records, 0);
    }

    #[tokio::test]
    async fn missing_base_url_is_fatal() {
        let repo = Repo::new(Vec::new());
        let store = Arc::new(MemoryStore::new());
        let oai = OaiHarvest::new(repo, OaiSettings::default(), RetryPolicy::immediate(0));
        assert!(harvester(&store).run(&oai, Vec::new()).await.is_err());
    }

    #[test]
    fn deleted_records_keep_header_only() {
        let rec = to_source_record(OaiRecord {
            identifier: "oai:r:9".into(),
            datestamp: Some("2024-02-02".into()),
            sets: vec!["a".into()],
            deleted: true,
            metadata: None,
        })
        .into_record();
        assert_eq!(rec.doc["deleted"], true);
        assert!(rec.get("raw").is_none());
    }

    #[tokio::test]
    async fn deletion_clears_earlier_metadata() {
        let deleted = r#"<OAI-PMH><ListRecords>
            <record><header status="deleted"><identifier>oai:r:1</identifier>
            <datestamp>2024-03-01</datestamp></header></record>
            </ListRecords></OAI-PMH>"#;
        let repo = Repo::new(vec![page(&[1], None), Ok(deleted.to_string())]);
        let store = Arc::new(MemoryStore::new());
        let oai = OaiHarvest::new(repo, settings(&[]), RetryPolicy::immediate(0));
        let h = harvester(&store);

        h.run(&oai, Vec::new()).await.unwrap();
        let before = store.get("repository_works", "oai:r:1").await.unwrap().unwrap();
        assert_eq!(before["doi"], "https://doi.org/10.1/w1");

        h.run(&oai, Vec::new()).await.unwrap();
        let after = store.get("repository_works", "oai:r:1").await.unwrap().unwrap();
        assert_eq!(after["deleted"], true);
        assert_eq!(after["datestamp"], "2024-03-01");
        assert!(!after.contains_key("doi"));
        assert!(!after.contains_key("raw"));
        let with_doi = store
            .find_many("repository_works", &rimline_store::Filter::all().exists("doi"), &[])
            .await
            .unwrap();
        assert!(with_doi.is_empty());
    }
}
