use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use housing_common::ckan::{CkanClient, CkanClientConfig};
use housing_common::overpass::{OverpassClient, OverpassClientConfig};
use housing_common::proximity::{ProximityCache, ProximityScorer, ScorerConfig};

use crate::config::{Config, DEFAULT_RELAY_MAX_BODY_BYTES};
use crate::server::{relay_client, AppState};

pub async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn test_state(ckan_base_url: &str, allowed_hosts: Option<Vec<String>>) -> AppState {
    test_state_with(ckan_base_url, allowed_hosts, "http://127.0.0.1:9/api/interpreter")
}

pub fn test_state_with(
    ckan_base_url: &str,
    allowed_hosts: Option<Vec<String>>,
    overpass_url: &str,
) -> AppState {
    let config = Config {
        listen_addr: "127.0.0.1:0".to_string(),
        ckan_base_url: ckan_base_url.to_string(),
        property_resource_id: "rentals".to_string(),
        property_limit: 100,
        grid_data_dir: std::env::temp_dir(),
        allowed_hosts,
        relay_max_body_bytes: DEFAULT_RELAY_MAX_BODY_BYTES,
    };
    let config = Arc::new(config);
    let ckan = CkanClient::new(CkanClientConfig {
        max_retries: 0,
        ..CkanClientConfig::new(ckan_base_url)
    })
    .unwrap();
    let overpass = OverpassClient::new(OverpassClientConfig {
        endpoint: overpass_url.to_string(),
        ..Default::default()
    })
    .unwrap();
    let scorer = ProximityScorer::new(
        overpass,
        Arc::new(ProximityCache::new()),
        ScorerConfig {
            rate_limit_wait: Duration::ZERO,
            gap_sparse: Duration::ZERO,
            gap_medium: Duration::ZERO,
            gap_dense: Duration::ZERO,
            ..Default::default()
        },
    );
    AppState {
        relay_http: relay_client(Duration::from_secs(5), Arc::clone(&config)).unwrap(),
        config,
        ckan,
        scorer: Arc::new(scorer),
        limiter: None,
    }
}
