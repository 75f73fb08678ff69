//! OpenAlex REST client: one page per call

use std::sync::Arc;

use rimline_core::{FetchError, HttpRequest, HttpTransport};
use rimline_store::Document;
use serde::Deserialize;
use serde_json::Value;

use crate::config::OpenAlexSettings;
use crate::paginate::PageRequest;
use crate::query::GraphQuery;

/// One page of results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub results: Vec<Document>,
    pub next_cursor: Option<String>,
    /// Total matches reported by the API
    pub count: Option<u64>,
}

#[derive(Deserialize)]
struct RawPage {
    #[serde(default)]
    meta: RawMeta,
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Deserialize, Default)]
struct RawMeta {
    #[serde(default)]
    next_cursor: Option<String>,
    #[serde(default)]
    count: Option<u64>,
}

/// Whether a 400 response means "no more pages" rather than a bad query.
pub fn is_pagination_exhausted(err: &FetchError) -> bool {
    match err {
        FetchError::Http {
            status: Some(400),
            message,
        } => {
            let m = message.to_lowercase();
            m.contains("pagination") || m.contains("maximum results")
        }
        _ => false,
    }
}

pub struct OpenAlexClient {
    transport: Arc<dyn HttpTransport>,
    settings: OpenAlexSettings,
}

impl OpenAlexClient {
    pub fn new(transport: Arc<dyn HttpTransport>, settings: OpenAlexSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &OpenAlexSettings {
        &self.settings
    }

    /// Request for one page of `query`.
    pub fn page_request(&self, query: &GraphQuery, page: &PageRequest) -> HttpRequest {
        let url = format!(
            "{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            query.entity.endpoint()
        );
        let mut req = HttpRequest::get(url)
            .query("filter", query.filter.as_str())
            .query("per-page", page.per_page.to_string())
            .query("cursor", page.cursor.as_str());
        if let Some(mailto) = &self.settings.mailto {
            req = req.query("mailto", mailto.as_str());
        }
        if let Some(key) = &self.settings.api_key {
            req = req.query("api_key", key.as_str());
        }
        req
    }

    pub async fn fetch_page(&self, query: &GraphQuery, page: &PageRequest) -> Result<Page, FetchError> {
        let response = self.transport.send(self.page_request(query, page)).await?;
        let raw: RawPage = serde_json::from_slice(&response.body)?;
        let results = raw
            .results
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(doc) => Some(doc),
                _ => None,
            })
            .collect();
        Ok(Page {
            results,
            next_cursor: raw.meta.next_cursor,
            count: raw.meta.count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    fn client(mailto: Option<&str>, api_key: Option<&str>) -> OpenAlexClient {
        struct Never;
        #[async_trait::async_trait]
        impl HttpTransport for Never {
            async fn send(&self, _r: HttpRequest) -> Result<rimline_core::HttpResponse, FetchError> {
                Err(FetchError::Connect("offline".into()))
            }
        }
        OpenAlexClient::new(
            Arc::new(Never),
            OpenAlexSettings {
                base_url: "https://api.openalex.org/".into(),
                mailto: mailto.map(String::from),
                api_key: api_key.map(String::from),
                ..OpenAlexSettings::default()
            },
        )
    }

    fn query() -> GraphQuery {
        GraphQuery {
            entity: Entity::Authors,
            filter: "ids.openalex:A1|A2".into(),
            label: "t".into(),
        }
    }

    #[test]
    fn request_carries_filter_cursor_and_size() {
        let req = client(None, None).page_request(
            &query(),
            &PageRequest {
                cursor: "*".into(),
                per_page: 12,
            },
        );
        assert_eq!(req.url, "https://api.openalex.org/authors");
        assert_eq!(req.query_value("filter"), Some("ids.openalex:A1|A2"));
        assert_eq!(req.query_value("per-page"), Some("12"));
        assert_eq!(req.query_value("cursor"), Some("*"));
        assert_eq!(req.query_value("mailto"), None);
    }

    #[test]
    fn politeness_parameters() {
        let req = client(Some("me@example.org"), Some("k")).page_request(
            &query(),
            &PageRequest {
                cursor: "abc".into(),
                per_page: 25,
            },
        );
        assert_eq!(req.query_value("mailto"), Some("me@example.org"));
        assert_eq!(req.query_value("api_key"), Some("k"));
    }

    #[test]
    fn exhausted_signal_detection() {
        assert!(is_pagination_exhausted(&FetchError::http(
            400,
            r#"{"error":"Pagination error","message":"Maximum results size of 10,000 records is exceeded"}"#
        )));
        assert!(!is_pagination_exhausted(&FetchError::http(400, "Invalid query parameters")));
        assert!(!is_pagination_exhausted(&FetchError::http(503, "pagination")));
    }
}
