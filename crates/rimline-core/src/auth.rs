//! OAuth bearer tokens from a refresh-token grant.
//!
//! Tokens are refreshed when older than the freshness window or when the
//! remote rejects one with 401. Refresh tokens rotated by the server replace
//! the configured one for the rest of the process.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{ErrorClass, FetchError};
use crate::retry::{RetryPolicy, retry_transient};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Default freshness window
pub const DEFAULT_REFRESH_AFTER: Duration = Duration::from_secs(45 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthSettings {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub refresh_after: Duration,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct TokenState {
    access: Option<String>,
    refresh_token: String,
    refreshed_at: Option<Instant>,
}

/// Per-harvester access token cache.
pub struct TokenCache {
    transport: Arc<dyn HttpTransport>,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_after: Duration,
    retry: RetryPolicy,
    state: Mutex<TokenState>,
}

impl TokenCache {
    pub fn new(transport: Arc<dyn HttpTransport>, settings: OAuthSettings) -> Self {
        Self {
            transport,
            token_url: settings.token_url,
            client_id: settings.client_id,
            client_secret: settings.client_secret,
            refresh_after: settings.refresh_after,
            retry: RetryPolicy::default(),
            state: Mutex::new(TokenState {
                access: None,
                refresh_token: settings.refresh_token,
                refreshed_at: None,
            }),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Current access token, refreshing first if missing or stale.
    pub async fn bearer(&self) -> Result<String, FetchError> {
        let mut state = self.state.lock().await;
        let fresh = state
            .refreshed_at
            .is_some_and(|at| at.elapsed() < self.refresh_after);
        if let (true, Some(token)) = (fresh, &state.access) {
            return Ok(token.clone());
        }
        self.refresh_locked(&mut state).await
    }

    /// Send `request` with the bearer token; on 401 refresh once and retry.
    ///
    /// Concurrent requests rejected with the same token share one refresh.
    pub async fn send(
        &self,
        transport: &dyn HttpTransport,
        request: HttpRequest,
    ) -> Result<HttpResponse, FetchError> {
        let token = self.bearer().await?;
        match transport.send(request.clone().bearer(token.clone())).await {
            Err(e) if e.class() == ErrorClass::Auth => {
                let token = self.replace_rejected(&token).await?;
                transport
                    .send(request.bearer(token))
                    .await
                    .map_err(|e| match e.class() {
                        ErrorClass::Auth => FetchError::Auth(format!("rejected after refresh: {e}")),
                        _ => e,
                    })
            }
            other => other,
        }
    }

    /// Refresh unless another request already replaced `rejected`.
    async fn replace_rejected(&self, rejected: &str) -> Result<String, FetchError> {
        let mut state = self.state.lock().await;
        match &state.access {
            Some(current) if current != rejected => Ok(current.clone()),
            _ => {
                log::info!("access token rejected, refreshing");
                self.refresh_locked(&mut state).await
            }
        }
    }

    async fn refresh_locked(&self, state: &mut TokenState) -> Result<String, FetchError> {
        let form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), state.refresh_token.clone()),
            ("client_id".to_string(), self.client_id.clone()),
            ("client_secret".to_string(), self.client_secret.clone()),
        ];
        let response = retry_transient("token refresh", &self.retry, || {
            self.transport
                .send(HttpRequest::post_form(&self.token_url, form.clone()))
        })
        .await
        .map_err(|e| match e.class() {
            ErrorClass::Fatal => e,
            _ => FetchError::Auth(format!("token refresh failed: {e}")),
        })?;

        let parsed: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|e| FetchError::Auth(format!("token response: {e}")))?;
        if let Some(rotated) = parsed.refresh_token {
            state.refresh_token = rotated;
        }
        state.access = Some(parsed.access_token.clone());
        state.refreshed_at = Some(Instant::now());
        log::debug!("access token refreshed");
        Ok(parsed.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Token endpoint issuing `t1`, `t2`, ... with rotated refresh tokens
    /// `r1`, `r2`, ...; resource endpoint accepts only the newest token, or
    /// rejects everything when `reject_all` is set.
    struct Server {
        issued: StdMutex<Vec<String>>,
        refresh_tokens_seen: StdMutex<Vec<String>>,
        reject_all: bool,
        stale_first: bool,
    }

    impl Server {
        fn new() -> Self {
            Self {
                issued: StdMutex::new(Vec::new()),
                refresh_tokens_seen: StdMutex::new(Vec::new()),
                reject_all: false,
                stale_first: false,
            }
        }
    }

    #[async_trait]
    impl HttpTransport for Server {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
            if request.url.ends_with("/token") {
                let refresh = request
                    .form
                    .iter()
                    .find(|(k, _)| k == "refresh_token")
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                self.refresh_tokens_seen.lock().unwrap().push(refresh);
                let mut issued = self.issued.lock().unwrap();
                let n = issued.len() + 1;
                issued.push(format!("t{n}"));
                let body = format!(r#"{{"access_token":"t{n}","refresh_token":"r{n}","expires_in":3600}}"#);
                return Ok(HttpResponse {
                    status: 200,
                    body: body.into_bytes(),
                });
            }
            // Let concurrent requests reach the server before any is answered
            tokio::task::yield_now().await;
            let issued = self.issued.lock().unwrap();
            let newest = issued.last().cloned();
            let accepted = !self.reject_all
                && request.bearer == newest
                && !(self.stale_first && issued.len() == 1);
            if accepted {
                Ok(HttpResponse {
                    status: 200,
                    body: b"{}".to_vec(),
                })
            } else {
                Err(FetchError::http(401, "invalid token"))
            }
        }
    }

    fn settings() -> OAuthSettings {
        OAuthSettings {
            token_url: "https://auth.example.org/token".into(),
            client_id: "id".into(),
            client_secret: "secret".into(),
            refresh_token: "r0".into(),
            refresh_after: DEFAULT_REFRESH_AFTER,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn token_cached_within_window() {
        let server = Arc::new(Server::new());
        let cache = TokenCache::new(server.clone(), settings());
        assert_eq!(cache.bearer().await.unwrap(), "t1");
        tokio::time::advance(Duration::from_secs(44 * 60)).await;
        assert_eq!(cache.bearer().await.unwrap(), "t1");
        assert_eq!(server.issued.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_token_refreshed_with_rotated_refresh_token() {
        let server = Arc::new(Server::new());
        let cache = TokenCache::new(server.clone(), settings());
        cache.bearer().await.unwrap();
        tokio::time::advance(Duration::from_secs(46 * 60)).await;
        assert_eq!(cache.bearer().await.unwrap(), "t2");
        assert_eq!(*server.refresh_tokens_seen.lock().unwrap(), vec!["r0", "r1"]);
    }

    #[tokio::test]
    async fn rejected_token_refreshed_and_retried_once() {
        let server = Arc::new(Server {
            stale_first: true,
            ..Server::new()
        });
        let cache = TokenCache::new(server.clone(), settings());
        let resp = cache
            .send(server.as_ref(), HttpRequest::get("https://api.example.org/x"))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(server.issued.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn second_rejection_surfaces_auth_error() {
        let server = Arc::new(Server {
            reject_all: true,
            ..Server::new()
        });
        let cache = TokenCache::new(server.clone(), settings());
        let err = cache
            .send(server.as_ref(), HttpRequest::get("https://api.example.org/x"))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Auth);
        assert!(matches!(err, FetchError::Auth(_)));
        assert_eq!(server.issued.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_rejections_share_one_refresh() {
        let server = Arc::new(Server {
            stale_first: true,
            ..Server::new()
        });
        let cache = TokenCache::new(server.clone(), settings());
        assert_eq!(cache.bearer().await.unwrap(), "t1");

        let send = || cache.send(server.as_ref(), HttpRequest::get("https://api.example.org/x"));
        let (a, b, c) = tokio::join!(send(), send(), send());
        for resp in [a, b, c] {
            assert_eq!(resp.unwrap().status, 200);
        }
        assert_eq!(*server.issued.lock().unwrap(), vec!["t1", "t2"]);
        assert_eq!(*server.refresh_tokens_seen.lock().unwrap(), vec!["r0", "r1"]);
    }
}
