use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use reqwest::redirect::Policy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use housing_common::ckan::CkanClient;
use housing_common::grid::{self, Classification, GridError, GridFeature};
use housing_common::normalize::load_properties;
use housing_common::overpass::OverpassClient;
use housing_common::proximity::{ProximityScorer, ScoreState};
use housing_common::stats::summarize;

use crate::config::Config;
use crate::error::error_response;
use crate::rate_limit::RateLimiter;
use crate::relay;

const MAX_CLASSES: usize = 12;
const MAX_RELAY_REDIRECTS: usize = 5;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ckan: CkanClient,
    pub relay_http: reqwest::Client,
    pub scorer: Arc<ProximityScorer<OverpassClient>>,
    pub limiter: Option<RateLimiter>,
}

impl AppState {
    /// Applies the relay rate limit, if configured.
    pub async fn gate(&self) -> Result<(), Response> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        limiter.check().await.map_err(|wait| {
            error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded",
                format!(
                    "RATE_LIMIT_RPS={}: try again in ~{}ms",
                    limiter.rps(),
                    wait.as_millis()
                ),
            )
        })
    }
}

/// HTTP client for the relays. Redirect hops must pass the same scheme and allow-list
/// check as the requested URL; a refused hop fails the request.
pub fn relay_client(timeout: Duration, config: Arc<Config>) -> reqwest::Result<reqwest::Client> {
    let policy = Policy::custom(move |attempt| {
        if attempt.previous().len() > MAX_RELAY_REDIRECTS {
            return attempt.stop();
        }
        if config.relay_target_allowed(attempt.url()) {
            return attempt.follow();
        }
        let refused = format!("redirect to {} is not allowed", attempt.url());
        attempt.error(refused)
    });
    reqwest::Client::builder()
        .user_agent("thai-housing-dashboard/relay")
        .timeout(timeout)
        .redirect(policy)
        .build()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/cors-proxy", any(relay::cors_proxy))
        .route("/api/ckan-proxy", any(relay::ckan_proxy))
        .route("/api/properties", get(list_properties))
        .route("/api/properties/stats", get(property_stats))
        .route(
            "/api/proximity/{id}",
            post(start_proximity).get(get_proximity),
        )
        .route("/api/proximity/{id}/nearby", get(get_nearby))
        .route("/api/grids/{province}", get(get_grid))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn list_properties(State(state): State<AppState>) -> Response {
    let properties = load_properties(
        &state.ckan,
        &state.config.property_resource_id,
        state.config.property_limit,
    )
    .await;
    Json(properties).into_response()
}

async fn property_stats(State(state): State<AppState>) -> Response {
    let properties = load_properties(
        &state.ckan,
        &state.config.property_resource_id,
        state.config.property_limit,
    )
    .await;
    Json(summarize(&properties)).into_response()
}

#[derive(Debug, Deserialize)]
struct ProximityRequest {
    latitude: f64,
    longitude: f64,
}

async fn start_proximity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ProximityRequest>,
) -> Response {
    let cache = state.scorer.cache();
    if !cache.try_begin(&id).await {
        return match cache.state(&id).await {
            Some(current) => (StatusCode::OK, Json(current)).into_response(),
            None => error_response(StatusCode::CONFLICT, "Score unavailable", id),
        };
    }

    info!(id, lat = req.latitude, lng = req.longitude, "starting proximity scoring");
    let scorer = Arc::clone(&state.scorer);
    let task_id = id.clone();
    tokio::spawn(async move {
        scorer
            .run_claimed(&task_id, req.latitude, req.longitude)
            .await;
    });
    (
        StatusCode::ACCEPTED,
        Json(ScoreState::Pending { partial: None }),
    )
        .into_response()
}

async fn get_proximity(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scorer.cache().state(&id).await {
        Some(current) => Json(current).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "No proximity score", id),
    }
}

async fn get_nearby(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scorer.cache().nearby(&id).await {
        Some(nearby) => Json(nearby).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "No nearby places cached", id),
    }
}

#[derive(Debug, Deserialize)]
struct GridParams {
    attribute: Option<String>,
    classes: Option<usize>,
}

#[derive(Debug, Serialize)]
struct GridResponse {
    province: String,
    features: Vec<GridFeature>,
    classification: Option<Classification>,
}

async fn get_grid(
    State(state): State<AppState>,
    Path(province): Path<String>,
    Query(params): Query<GridParams>,
) -> Response {
    let layer = match grid::load_province(&state.config.grid_data_dir, &province).await {
        Ok(layer) => layer,
        Err(e @ GridError::InvalidProvince(_)) => {
            return error_response(StatusCode::BAD_REQUEST, "Invalid province", e.to_string())
        }
        Err(e @ GridError::NotFound { .. }) => {
            return error_response(StatusCode::NOT_FOUND, "Unknown province", e.to_string())
        }
        Err(e) => {
            warn!(province, error = %e, "failed to load grid");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load grid",
                e.to_string(),
            );
        }
    };

    let classification = params.attribute.as_deref().and_then(|attribute| {
        let classes = params.classes.unwrap_or(5).clamp(1, MAX_CLASSES);
        layer.classify(attribute, classes)
    });
    Json(GridResponse {
        province: layer.province,
        features: layer.features,
        classification,
    })
    .into_response()
}
