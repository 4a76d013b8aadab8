//! Client for the CKAN action API.
//!
//! Every call is a POST to `{base_url}/api/3/action/{action}` with a JSON body. CKAN wraps
//! results in `{success, result, error}`; a `success:false` payload is surfaced as
//! [`CkanError::Remote`] carrying the remote message. Transport failures and 5xx/429
//! responses are retried with capped exponential back-off.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::http::{backoff_delay, env_parse, read_limited_text};

#[derive(Clone, Debug)]
pub struct CkanClientConfig {
    pub base_url: String,
    pub default_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_error_body_bytes: usize,
}

impl CkanClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            default_timeout: Duration::from_secs(30),
            max_retries: 2,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(5_000),
            max_error_body_bytes: 8 * 1024,
        }
    }

    /// Builds a config for `base_url`, overriding the retry knobs from
    /// `CKAN_TIMEOUT_SECS`, `CKAN_MAX_RETRIES`, `CKAN_RETRY_INITIAL_MS`,
    /// `CKAN_RETRY_MAX_MS` and `CKAN_MAX_ERROR_BODY_BYTES` when present.
    pub fn from_env(base_url: &str) -> Self {
        let defaults = Self::new(base_url);
        Self {
            default_timeout: env_parse::<u64>("CKAN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_timeout),
            max_retries: env_parse("CKAN_MAX_RETRIES").unwrap_or(defaults.max_retries),
            initial_backoff: env_parse::<u64>("CKAN_RETRY_INITIAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            max_backoff: env_parse::<u64>("CKAN_RETRY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            max_error_body_bytes: env_parse("CKAN_MAX_ERROR_BODY_BYTES")
                .unwrap_or(defaults.max_error_body_bytes),
            ..defaults
        }
    }

    pub fn action_url(&self, action: &str) -> String {
        format!("{}/api/3/action/{}", self.base_url, action)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CkanError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("ckan reported failure: {0}")]
    Remote(String),

    #[error("upstream returned error: status={status} message={message}")]
    Upstream { status: StatusCode, message: String },

    #[error("upstream returned non-JSON error: status={status} body={body}")]
    UpstreamBody { status: StatusCode, body: String },
}

#[derive(Clone)]
pub struct CkanClient {
    config: CkanClientConfig,
    http: reqwest::Client,
}

impl CkanClient {
    pub fn new(config: CkanClientConfig) -> Result<Self, CkanError> {
        let http = reqwest::Client::builder()
            .user_agent("thai-housing-dashboard/ckan")
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &CkanClientConfig {
        &self.config
    }

    /// `datastore_search` over one resource, returning the `result` object.
    pub async fn datastore_search(
        &self,
        resource_id: &str,
        options: &DatastoreSearchOptions,
    ) -> Result<DatastoreSearchResult, CkanError> {
        let body = DatastoreSearchRequest {
            resource_id,
            options,
        };
        self.action("datastore_search", &serde_json::to_value(&body)?)
            .await
    }

    /// `datastore_search_sql` with a raw SQL statement.
    pub async fn datastore_search_sql(&self, sql: &str) -> Result<DatastoreSqlResult, CkanError> {
        self.action("datastore_search_sql", &serde_json::json!({ "sql": sql }))
            .await
    }

    pub async fn package_show(&self, id: &str) -> Result<PackageInfo, CkanError> {
        self.action("package_show", &serde_json::json!({ "id": id }))
            .await
    }

    /// Invokes an arbitrary action and unwraps the CKAN envelope into `T`.
    pub async fn action<T: DeserializeOwned>(
        &self,
        action: &str,
        body: &Value,
    ) -> Result<T, CkanError> {
        let url = self.config.action_url(action);
        debug!(action, "ckan action request");
        self.request_with_retry(|| {
            let url = url.clone();
            async move {
                let resp = self
                    .http
                    .post(&url)
                    .timeout(self.config.default_timeout)
                    .json(body)
                    .send()
                    .await?;
                Self::parse_envelope(resp, self.config.max_error_body_bytes).await
            }
        })
        .await
    }

    async fn parse_envelope<T: DeserializeOwned>(
        resp: reqwest::Response,
        max_error_body_bytes: usize,
    ) -> Result<T, CkanError> {
        let status = resp.status();
        if !status.is_success() {
            let body = read_limited_text(resp, max_error_body_bytes).await;
            if let Ok(parsed) = serde_json::from_str::<CkanEnvelope<Value>>(&body) {
                let message = parsed
                    .error
                    .map(|e| e.describe())
                    .unwrap_or_else(|| "unknown upstream error".to_string());
                return Err(CkanError::Upstream { status, message });
            }
            return Err(CkanError::UpstreamBody { status, body });
        }

        let bytes = resp.bytes().await?;
        let envelope: CkanEnvelope<T> = serde_json::from_slice(&bytes)?;
        if !envelope.success {
            let message = envelope
                .error
                .map(|e| e.describe())
                .unwrap_or_else(|| "unknown ckan error".to_string());
            return Err(CkanError::Remote(message));
        }
        envelope
            .result
            .ok_or_else(|| CkanError::Remote("response is missing `result`".to_string()))
    }

    /// Runs `f` until it succeeds, fails with a non-retryable error, or `max_retries`
    /// retries have been spent.
    async fn request_with_retry<T, Fut, F>(&self, mut f: F) -> Result<T, CkanError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, CkanError>>,
    {
        let mut retries: u32 = 0;
        loop {
            let err = match f().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            if retries >= self.config.max_retries || !should_retry(&err) {
                return Err(err);
            }
            let delay = backoff_delay(self.config.initial_backoff, self.config.max_backoff, retries);
            retries += 1;
            warn!(
                retry = retries,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis(),
                error = %err,
                "ckan action failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn should_retry(err: &CkanError) -> bool {
    match err {
        CkanError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        CkanError::Upstream { status, .. } | CkanError::UpstreamBody { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
        }
        CkanError::InvalidJson(_) | CkanError::Remote(_) => false,
    }
}

#[derive(Debug, Deserialize)]
struct CkanEnvelope<T> {
    #[serde(default)]
    success: bool,
    result: Option<T>,
    error: Option<CkanErrorObject>,
}

#[derive(Debug, Deserialize)]
struct CkanErrorObject {
    message: Option<String>,
    #[serde(rename = "__type")]
    kind: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl CkanErrorObject {
    fn describe(self) -> String {
        match (self.message, self.kind) {
            (Some(message), _) => message,
            (None, Some(kind)) if self.fields.is_empty() => kind,
            (None, kind) => {
                let detail = Value::Object(self.fields).to_string();
                match kind {
                    Some(kind) => format!("{kind}: {detail}"),
                    None => detail,
                }
            }
        }
    }
}

/// Caller-supplied knobs for `datastore_search`. Unset fields are omitted from the request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatastoreSearchOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
}

#[derive(Serialize)]
struct DatastoreSearchRequest<'a> {
    resource_id: &'a str,
    #[serde(flatten)]
    options: &'a DatastoreSearchOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreField {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreSearchResult {
    #[serde(default)]
    pub records: Vec<Map<String, Value>>,
    #[serde(default)]
    pub fields: Vec<DatastoreField>,
    pub total: Option<u64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreSqlResult {
    #[serde(default)]
    pub records: Vec<Map<String, Value>>,
    #[serde(default)]
    pub fields: Vec<DatastoreField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    pub id: String,
    pub name: String,
    pub title: Option<String>,
    #[serde(default)]
    pub resources: Vec<PackageResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageResource {
    pub id: String,
    pub name: Option<String>,
    pub format: Option<String>,
    pub url: Option<String>,
}
