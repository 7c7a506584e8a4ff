//! Shared JSON-over-HTTP client
//!
//! Low level transport used by every collaborator client. Non-success
//! statuses become `AppError::NotFound` (404) or `AppError::Upstream`;
//! timeouts become `AppError::UpstreamTimeout`.

use credits_core::{AppError, AppResult};
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

/// HTTP client bound to one base URL
#[derive(Clone)]
pub struct HttpClient {
    http: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a client
    ///
    /// # Arguments
    ///
    /// * `base_url` - Service root, e.g. "http://accounts.internal:8080"
    /// * `timeout_ms` - Per-request timeout in milliseconds
    pub fn new(base_url: &str, timeout_ms: u64) -> AppResult<Self> {
        let http = ClientBuilder::new()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET `path` and decode the JSON body
    #[instrument(skip(self))]
    pub async fn get_json<R>(&self, path: &str, query: &[(&str, &str)]) -> AppResult<R>
    where
        R: DeserializeOwned,
    {
        debug!("GET {}{}", self.base_url, path);
        let response = self.http.get(self.url(path)).query(query).send().await?;
        let response = check_status(path, response).await?;
        Ok(response.json::<R>().await?)
    }

    /// POST a JSON body to `path`, ignoring any reply body
    #[instrument(skip(self, body))]
    pub async fn post<T>(&self, path: &str, body: &T) -> AppResult<()>
    where
        T: Serialize + ?Sized,
    {
        debug!("POST {}{}", self.base_url, path);
        let response = self.http.post(self.url(path)).json(body).send().await?;
        check_status(path, response).await?;
        Ok(())
    }
}

/// Map a 404 on an account route to `AppError::AccountNotFound`
pub(crate) fn account_not_found(account_id: &str) -> impl FnOnce(AppError) -> AppError + '_ {
    move |e| match e {
        AppError::NotFound(_) => AppError::AccountNotFound(account_id.to_string()),
        other => other,
    }
}

async fn check_status(path: &str, response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(AppError::NotFound(path.to_string()));
    }

    let body = response.text().await.unwrap_or_default();
    error!("HTTP error from {}: status={}", path, status);
    Err(AppError::Upstream(format!("{} returned {}: {}", path, status, body)))
}
