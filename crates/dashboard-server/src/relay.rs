//! Same-origin relays so browser clients can reach CKAN and other JSON APIs.
//!
//! - `/api/cors-proxy?url=...` performs a GET to `url` and passes the JSON body through.
//! - `/api/ckan-proxy?action=...` POSTs a JSON payload to the configured CKAN action API.
//!
//! Both answer `OPTIONS` preflights and attach permissive CORS headers to every response.
//! Neither retries; retry policy belongs to the clients.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use axum::http::{HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::error_response;
use crate::server::AppState;

const MAX_ERROR_PREVIEW: usize = 200;

pub fn cors_headers() -> [(HeaderName, &'static str); 3] {
    [
        (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        (ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
        (ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization"),
    ]
}

fn preflight() -> Response {
    (StatusCode::OK, cors_headers()).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CorsProxyParams {
    url: Option<String>,
}

pub async fn cors_proxy(
    State(state): State<AppState>,
    method: Method,
    Query(params): Query<CorsProxyParams>,
) -> Response {
    if method == Method::OPTIONS {
        return preflight();
    }
    if method != Method::GET {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
            format!("{method} is not supported, use GET"),
        );
    }
    if let Err(resp) = state.gate().await {
        return resp;
    }

    let Some(raw_url) = params.url.filter(|u| !u.trim().is_empty()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing url parameter",
            "pass the target as ?url=<urlencoded>",
        );
    };
    let url = match Url::parse(raw_url.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url,
        Ok(url) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Unsupported URL scheme",
                format!("scheme {} is not allowed", url.scheme()),
            )
        }
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "Invalid url parameter", e.to_string()),
    };
    let host = url.host_str().unwrap_or_default();
    if !state.config.host_allowed(host) {
        warn!(host, "cors proxy refused host outside allow-list");
        return error_response(
            StatusCode::FORBIDDEN,
            "Host not allowed",
            format!("{host} is not in PROXY_ALLOWED_HOSTS"),
        );
    }

    debug!(url = %url, "relaying GET");
    let upstream = match state.relay_http.get(url.clone()).send().await {
        Ok(resp) => resp,
        Err(e) if e.is_redirect() => {
            warn!(url = %url, error = %e, "cors proxy refused redirect");
            return error_response(
                StatusCode::FORBIDDEN,
                "Host not allowed",
                format!("{url} redirected outside PROXY_ALLOWED_HOSTS"),
            );
        }
        Err(e) => {
            warn!(url = %url, error = %e, "cors proxy upstream request failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch from upstream",
                e.to_string(),
            );
        }
    };
    pass_through_json(upstream, state.config.relay_max_body_bytes).await
}

pub async fn ckan_proxy(
    State(state): State<AppState>,
    method: Method,
    Query(mut params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        return preflight();
    }
    if method != Method::GET && method != Method::POST {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
            format!("{method} is not supported, use GET or POST"),
        );
    }
    if let Err(resp) = state.gate().await {
        return resp;
    }

    let Some(action) = params.remove("action").filter(|a| !a.is_empty()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing action parameter",
            "pass the CKAN action as ?action=<name>",
        );
    };
    if !action.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid action parameter",
            format!("{action:?} is not a CKAN action name"),
        );
    }

    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(
            params
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect::<Map<String, Value>>(),
        )
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(v) => v,
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, "Invalid JSON body", e.to_string())
            }
        }
    };

    let target = state.ckan.config().action_url(&action);
    debug!(action, "relaying CKAN action");
    let upstream = match state.relay_http.post(&target).json(&payload).send().await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(action, error = %e, "ckan proxy upstream request failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to reach CKAN",
                e.to_string(),
            );
        }
    };
    pass_through_json(upstream, state.config.relay_max_body_bytes).await
}

/// Returns the upstream body untouched with the upstream status, provided it is JSON and
/// no larger than `max_bytes`.
async fn pass_through_json(upstream: reqwest::Response, max_bytes: usize) -> Response {
    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("<none>")
        .to_string();

    let body = match read_capped(upstream, max_bytes).await {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    if let Err(e) = serde_json::from_slice::<serde::de::IgnoredAny>(&body) {
        let preview: String = String::from_utf8_lossy(&body)
            .chars()
            .take(MAX_ERROR_PREVIEW)
            .collect();
        warn!(%status, content_type, "upstream response is not JSON");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Upstream response is not valid JSON",
            format!("status={status} content-type={content_type} parse_error={e} body={preview}"),
        );
    }

    (status, cors_headers(), [(CONTENT_TYPE, "application/json")], body).into_response()
}

async fn read_capped(upstream: reqwest::Response, max_bytes: usize) -> Result<Bytes, Response> {
    let too_large = |seen: u64| {
        warn!(seen, max_bytes, "upstream response exceeds relay limit");
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Upstream response too large",
            format!("body exceeds {max_bytes} bytes"),
        )
    };
    if let Some(len) = upstream.content_length().filter(|len| *len > max_bytes as u64) {
        return Err(too_large(len));
    }

    let mut stream = upstream.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read upstream response",
                e.to_string(),
            )
        })?;
        if buf.len() + chunk.len() > max_bytes {
            return Err(too_large((buf.len() + chunk.len()) as u64));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}
