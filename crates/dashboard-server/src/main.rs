mod config;
mod error;
mod rate_limit;
mod relay;
mod server;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use housing_common::ckan::{CkanClient, CkanClientConfig, DatastoreSearchOptions};
use housing_common::error::CommonError;
use housing_common::overpass::{OverpassClient, OverpassClientConfig};
use housing_common::proximity::{ProximityCache, ProximityScorer, ScorerConfig};

use config::Config;
use error::AppError;
use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting dashboard-server");

    let config = Config::from_env()?;
    info!(
        listen_addr = %config.listen_addr,
        ckan_base_url = %config.ckan_base_url,
        resource_id = %config.property_resource_id,
        grid_data_dir = %config.grid_data_dir.display(),
        allow_list = config.allowed_hosts.is_some(),
        relay_max_body_bytes = config.relay_max_body_bytes,
        "configuration loaded"
    );

    let ckan_config = CkanClientConfig::from_env(&config.ckan_base_url);
    info!(
        timeout_ms = ckan_config.default_timeout.as_millis(),
        max_retries = ckan_config.max_retries,
        "ckan client configured"
    );
    let ckan = CkanClient::new(ckan_config).map_err(|e| AppError::from(CommonError::from(e)))?;

    let probe = DatastoreSearchOptions {
        limit: Some(0),
        ..Default::default()
    };
    match ckan.datastore_search(&config.property_resource_id, &probe).await {
        Ok(result) => info!(total = ?result.total, "ckan property resource reachable"),
        Err(e) => warn!(error = %e, "ckan probe failed, property endpoints will degrade"),
    }

    let overpass_config = OverpassClientConfig::from_env();
    info!(endpoint = %overpass_config.endpoint, "overpass client configured");
    let overpass =
        OverpassClient::new(overpass_config).map_err(|e| AppError::from(CommonError::from(e)))?;
    let scorer = ProximityScorer::new(
        overpass,
        Arc::new(ProximityCache::new()),
        ScorerConfig::default(),
    );

    let limiter = rate_limit::RateLimiter::from_env();
    if let Some(limiter) = &limiter {
        info!(rps = limiter.rps(), "relay rate limit enabled");
    }

    let config = Arc::new(config);
    let state = AppState {
        relay_http: server::relay_client(Duration::from_secs(30), Arc::clone(&config))?,
        config: Arc::clone(&config),
        ckan,
        scorer: Arc::new(scorer),
        limiter,
    };

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!(listen_addr = %config.listen_addr, "dashboard-server ready");
    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    info!("dashboard-server shut down");
    Ok(())
}
