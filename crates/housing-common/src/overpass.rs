use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http::{env_parse, read_limited_text};

const DEFAULT_ENDPOINT: &str = "https://overpass-api.de/api/interpreter";

#[derive(Clone, Debug)]
pub struct OverpassClientConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub max_error_body_bytes: usize,
}

impl Default for OverpassClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
            max_error_body_bytes: 4 * 1024,
        }
    }
}

impl OverpassClientConfig {
    /// Optional: `OVERPASS_URL`, `OVERPASS_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: std::env::var("OVERPASS_URL").unwrap_or(defaults.endpoint),
            timeout: env_parse::<u64>("OVERPASS_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            ..defaults
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OverpassError {
    #[error("rate limited by overpass (429)")]
    RateLimited,

    #[error("overpass gateway timeout (504)")]
    GatewayTimeout,

    #[error("upstream returned error: status={status} body={body}")]
    Upstream { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// One OSM element from an `out center;` response. Nodes carry `lat`/`lon`, ways and
/// relations carry `center`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverpassElement {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: u64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub center: Option<Center>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Center {
    pub lat: f64,
    pub lon: f64,
}

impl OverpassElement {
    /// `(lat, lon)` of the node itself or of the way/relation center.
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lon, self.center) {
            (Some(lat), Some(lon), _) => Some((lat, lon)),
            (_, _, Some(c)) => Some((c.lat, c.lon)),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

/// Anything that can answer an Overpass QL query with a list of elements.
pub trait PoiSource: Send + Sync {
    fn query(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<Vec<OverpassElement>, OverpassError>> + Send;
}

#[derive(Clone)]
pub struct OverpassClient {
    config: OverpassClientConfig,
    http: reqwest::Client,
}

impl OverpassClient {
    pub fn new(config: OverpassClientConfig) -> Result<Self, OverpassError> {
        let http = reqwest::Client::builder()
            .user_agent("thai-housing-dashboard/overpass")
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &OverpassClientConfig {
        &self.config
    }
}

impl PoiSource for OverpassClient {
    async fn query(&self, query: &str) -> Result<Vec<OverpassElement>, OverpassError> {
        let resp = self
            .http
            .post(&self.config.endpoint)
            .timeout(self.config.timeout)
            .form(&[("data", query)])
            .send()
            .await?;

        let status = resp.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => return Err(OverpassError::RateLimited),
            StatusCode::GATEWAY_TIMEOUT => return Err(OverpassError::GatewayTimeout),
            s if !s.is_success() => {
                let body = read_limited_text(resp, self.config.max_error_body_bytes).await;
                return Err(OverpassError::Upstream { status, body });
            }
            _ => {}
        }

        let bytes = resp.bytes().await?;
        let parsed: OverpassResponse = serde_json::from_slice(&bytes)?;
        debug!(elements = parsed.elements.len(), "overpass query answered");
        Ok(parsed.elements)
    }
}
