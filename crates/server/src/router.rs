//! The `/v2` query surface and SSE tip stream.
//!
//! Responses use the envelope `{"status":"success","value":...}` /
//! `{"status":"error","code":"...","description":"..."}` except for the
//! binary `/v2/headers` endpoint and the SSE stream.
//!
//! Cache policy is tiered by confirmation depth: headers buried more
//! than the prune horizon below the tip are immutable and served with a
//! long public max-age; anything shallower (and everything while the
//! tip itself is still below the horizon) is `no-cache`.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::get,
    Json, Router,
};
use chainview_core::{chain::PRUNE_HORIZON, codec::BlockHash, tracker::ChainTracker};
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::{collections::HashMap, convert::Infallible, sync::Arc, time::Duration};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::ToSchema;

/// Interval between SSE keepalive comments.
const SSE_KEEPALIVE: Duration = Duration::from_secs(15);

/// Shared state handed to every handler.
///
/// Handlers program against the [`ChainTracker`] capability set, so the
/// same router serves an embedded manager or a remote client.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<dyn ChainTracker>,
}

/// Error response envelope.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    #[schema(example = "error")]
    pub status: String,
    #[schema(example = "ERR_NOT_FOUND")]
    pub code: String,
    #[schema(example = "Header not found")]
    pub description: String,
}

fn success<T: Serialize>(value: T) -> Json<serde_json::Value> {
    Json(json!({ "status": "success", "value": value }))
}

fn error(code: &str, description: &str) -> Json<serde_json::Value> {
    Json(json!({ "status": "error", "code": code, "description": description }))
}

/// Cache-Control value for a header at `height` given the current tip.
///
/// While the tip is below the horizon nothing is safely immutable yet,
/// so everything is `no-cache`; the unsigned subtraction is guarded by
/// that same check.
fn cache_control_for(height: u32, tip: u32) -> &'static str {
    if tip >= PRUNE_HORIZON && height < tip - PRUNE_HORIZON {
        "public, max-age=3600"
    } else {
        "no-cache"
    }
}

/// Builds the full application router.
pub fn create_router(state: AppState) -> Router {
    let v2 = Router::new()
        .route("/network", get(handle_network))
        .route("/height", get(handle_height))
        .route("/tip", get(handle_tip))
        .route("/tip/stream", get(handle_tip_stream))
        .route("/header/height/{height}", get(handle_header_by_height))
        .route("/header/hash/{hash}", get(handle_header_by_hash))
        .route("/headers", get(handle_headers));

    Router::new()
        .route("/", get(handle_root))
        .route("/robots.txt", get(handle_robots))
        .route("/openapi.yaml", get(crate::openapi::handle_openapi_spec))
        .route("/docs", get(crate::openapi::handle_docs))
        .nest("/v2", v2)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Service identification plus a small live status block.
pub async fn handle_root(State(state): State<AppState>) -> impl IntoResponse {
    let height = state.tracker.get_height().await;
    let tip = state.tracker.get_tip().await;
    let network = state.tracker.get_network().await.unwrap_or_default();

    success(json!({
        "service": "chainview-server",
        "network": network,
        "height": height,
        "tipHash": tip.map(|t| t.hash.to_string()),
    }))
}

pub async fn handle_robots() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain")],
        "User-agent: *\nDisallow: /\n",
    )
}

/// Returns the network name this service tracks.
#[utoipa::path(
    get,
    path = "/v2/network",
    tag = "chainview",
    responses(
        (status = 200, description = "Network name"),
        (status = 500, description = "Internal error", body = ErrorBody)
    )
)]
pub async fn handle_network(State(state): State<AppState>) -> impl IntoResponse {
    match state.tracker.get_network().await {
        Ok(network) => (StatusCode::OK, success(network)).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error("ERR_INTERNAL", &err.to_string()),
        )
            .into_response(),
    }
}

/// Returns the current chain height.
#[utoipa::path(
    get,
    path = "/v2/height",
    tag = "chainview",
    responses((status = 200, description = "Current blockchain height"))
)]
pub async fn handle_height(State(state): State<AppState>) -> impl IntoResponse {
    let height = state.tracker.get_height().await;
    (
        [(header::CACHE_CONTROL, "public, max-age=60")],
        success(height),
    )
}

/// Returns the current chain tip header.
#[utoipa::path(
    get,
    path = "/v2/tip",
    tag = "chainview",
    responses(
        (status = 200, description = "Chain tip header", body = chainview_core::BlockHeader),
        (status = 404, description = "No chain tip yet", body = ErrorBody)
    )
)]
pub async fn handle_tip(State(state): State<AppState>) -> impl IntoResponse {
    let headers = [(header::CACHE_CONTROL, "no-cache")];
    match state.tracker.get_tip().await {
        Some(tip) => (StatusCode::OK, headers, success(tip.as_ref())).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            headers,
            error("ERR_NO_TIP", "Chain tip not found"),
        )
            .into_response(),
    }
}

/// Streams tip updates as Server-Sent Events.
///
/// Sends the current tip immediately, then each new tip as it is
/// installed, with a `: keepalive` comment every 15 seconds to defeat
/// proxy idle timeouts. Dropping the connection releases the
/// subscription.
#[utoipa::path(
    get,
    path = "/v2/tip/stream",
    tag = "chainview",
    responses((status = 200, description = "SSE stream of BlockHeader JSON objects"))
)]
pub async fn handle_tip_stream(State(state): State<AppState>) -> impl IntoResponse {
    let subscription = state.tracker.subscribe();
    let initial = state.tracker.get_tip().await;

    let initial_events = futures::stream::iter(
        initial
            .into_iter()
            .filter_map(|tip| Event::default().json_data(tip.as_ref()).ok())
            .map(Ok::<_, Infallible>),
    );
    let updates = subscription
        .filter_map(|tip| async move { Event::default().json_data(tip.as_ref()).ok() })
        .map(Ok::<_, Infallible>);

    Sse::new(initial_events.chain(updates))
        .keep_alive(KeepAlive::new().interval(SSE_KEEPALIVE).text("keepalive"))
}

/// Returns the main-chain header at a height.
#[utoipa::path(
    get,
    path = "/v2/header/height/{height}",
    tag = "chainview",
    params(("height" = u32, Path, description = "Block height")),
    responses(
        (status = 200, description = "Header at height", body = chainview_core::BlockHeader),
        (status = 400, description = "Invalid height parameter", body = ErrorBody),
        (status = 404, description = "Header not found", body = ErrorBody)
    )
)]
pub async fn handle_header_by_height(
    State(state): State<AppState>,
    Path(height): Path<String>,
) -> impl IntoResponse {
    let Ok(height) = height.parse::<u32>() else {
        return (
            StatusCode::BAD_REQUEST,
            [(header::CACHE_CONTROL, "no-cache")],
            error("ERR_INVALID_PARAMS", "Invalid height parameter"),
        )
            .into_response();
    };

    let tip = state.tracker.get_height().await;
    let cache = [(header::CACHE_CONTROL, cache_control_for(height, tip))];

    match state.tracker.get_header_by_height(height).await {
        Ok(found) => (StatusCode::OK, cache, success(found.as_ref())).into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            cache,
            error("ERR_NOT_FOUND", &format!("Header not found at height {height}")),
        )
            .into_response(),
    }
}

/// Returns the header with the given hash.
#[utoipa::path(
    get,
    path = "/v2/header/hash/{hash}",
    tag = "chainview",
    params(("hash" = String, Path, description = "Block hash (hex)")),
    responses(
        (status = 200, description = "Header with hash", body = chainview_core::BlockHeader),
        (status = 400, description = "Invalid hash parameter", body = ErrorBody),
        (status = 404, description = "Header not found", body = ErrorBody)
    )
)]
pub async fn handle_header_by_hash(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> impl IntoResponse {
    let Ok(hash) = BlockHash::from_hex(&hash) else {
        return (
            StatusCode::BAD_REQUEST,
            [(header::CACHE_CONTROL, "no-cache")],
            error("ERR_INVALID_PARAMS", "Invalid hash parameter"),
        )
            .into_response();
    };

    match state.tracker.get_header_by_hash(&hash).await {
        Ok(found) => {
            let tip = state.tracker.get_height().await;
            let cache = [(header::CACHE_CONTROL, cache_control_for(found.height, tip))];
            (StatusCode::OK, cache, success(found.as_ref())).into_response()
        }
        Err(_) => (
            StatusCode::NOT_FOUND,
            [(header::CACHE_CONTROL, "no-cache")],
            error("ERR_NOT_FOUND", &format!("Header not found for hash {hash}")),
        )
            .into_response(),
    }
}

/// Returns concatenated 80-byte headers as binary data.
#[utoipa::path(
    get,
    path = "/v2/headers",
    tag = "chainview",
    params(
        ("height" = u32, Query, description = "Starting block height"),
        ("count" = u32, Query, description = "Number of headers to return")
    ),
    responses(
        (status = 200, description = "Concatenated 80-byte headers", content_type = "application/octet-stream"),
        (status = 400, description = "Missing or invalid parameters", body = ErrorBody)
    )
)]
pub async fn handle_headers(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let (Some(height_str), Some(count_str)) = (params.get("height"), params.get("count")) else {
        return (
            StatusCode::BAD_REQUEST,
            error("ERR_INVALID_PARAMS", "Missing height or count parameter"),
        )
            .into_response();
    };
    let Ok(height) = height_str.parse::<u32>() else {
        return (
            StatusCode::BAD_REQUEST,
            error("ERR_INVALID_PARAMS", "Invalid height parameter"),
        )
            .into_response();
    };
    let Ok(count) = count_str.parse::<u32>() else {
        return (
            StatusCode::BAD_REQUEST,
            error("ERR_INVALID_PARAMS", "Invalid count parameter"),
        )
            .into_response();
    };

    let tip = state.tracker.get_height().await;
    let found = state.tracker.get_headers(height, count).await.unwrap_or_default();

    let mut data = Vec::with_capacity(found.len() * 80);
    for item in &found {
        data.extend_from_slice(&item.to_bytes());
    }

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CACHE_CONTROL, cache_control_for(height, tip)),
        ],
        data,
    )
        .into_response()
}
