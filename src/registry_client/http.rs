use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ExternalCandidateRecord, ExternalLocationStat, RegistryClient, DEFAULT_TIMEOUT_MS};
use crate::error::{ElectionError, Result};

const ROUTE_CANDIDATES: &str = "candidate/";
const ROUTE_POPULATION: &str = "population/statistic/";
const ROUTE_SUBMIT: &str = "mp/submit/";

/// Connection settings for the registry HTTP API.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL; routes are appended to it.
    pub base_url: String,

    /// Bearer token.
    pub api_key: Option<String>,

    /// Timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/".into(),
            api_key: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Serialize)]
struct SubmitPayload<'a> {
    #[serde(rename = "CitizenID")]
    citizen_id: &'a str,
}

/// Registry client over authenticated HTTP.
pub struct HttpRegistryClient {
    config: RegistryConfig,
    client: Client,
}

impl HttpRegistryClient {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        if config.timeout_ms == 0 {
            return Err(ElectionError::Config("registry timeout_ms must be > 0".into()));
        }
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            return Err(ElectionError::Config(format!(
                "registry base_url must be http(s): {}",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ElectionError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), route)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, route: &str) -> Result<T> {
        let url = self.url(route);
        debug!(%url, "registry GET");

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ElectionError::ExternalUnavailable(format!("GET {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(ElectionError::ExternalUnavailable(format!(
                "GET {url}: status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ElectionError::ExternalUnavailable(format!("GET {url}: invalid response: {e}")))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    fn name(&self) -> &'static str {
        "http"
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn fetch_candidate_roster(&self) -> Result<Vec<ExternalCandidateRecord>> {
        self.get_json(ROUTE_CANDIDATES).await
    }

    async fn fetch_population_statistics(&self) -> Result<Vec<ExternalLocationStat>> {
        self.get_json(ROUTE_POPULATION).await
    }

    async fn submit_winning_candidate(&self, citizen_id: &str) -> Result<serde_json::Value> {
        let url = self.url(ROUTE_SUBMIT);
        debug!(%url, citizen_id, "registry POST");

        let response = self
            .authorize(self.client.post(&url))
            .json(&SubmitPayload { citizen_id })
            .send()
            .await
            .map_err(|e| ElectionError::SubmissionFailed(format!("POST {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ElectionError::SubmissionFailed(format!(
                "POST {url}: status {status}: {text}"
            )));
        }

        // an empty 2xx body still counts as accepted
        let body = response
            .text()
            .await
            .map_err(|e| ElectionError::SubmissionFailed(format!("POST {url}: {e}")))?;
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| ElectionError::SubmissionFailed(format!("POST {url}: invalid response: {e}")))
    }
}
