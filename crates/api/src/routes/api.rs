use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use common::ms_to_datetime;
use features::build_observation;

use crate::{auth::require_auth, AppState};

pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/history/:symbol", get(get_history))
        .route("/api/observation", post(post_observation))
        .route("/api/observation/:symbol", get(get_observation))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

fn not_found(what: &str, symbol: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} not found"), "symbol": symbol })),
    )
        .into_response()
}

// ─── Status ──────────────────────────────────────────────────────────────────

async fn get_status(State(state): State<AppState>) -> Json<Value> {
    let engine_state = state.engine.state().await;
    let snapshots = state.engine.snapshots().await;

    let symbols: BTreeMap<String, Value> = snapshots
        .into_iter()
        .map(|(symbol, snap)| {
            let entry = json!({
                "history_len": snap.history_len,
                "last_close": snap.last_close(),
                "last_candle_start": snap.last_candle.map(|c| ms_to_datetime(c.start_ts)),
            });
            (symbol, entry)
        })
        .collect();

    Json(json!({
        "engine": engine_state.to_string(),
        "mode": state.mode.to_string(),
        "window_size": state.window_size,
        "symbols": symbols,
        "stats": state.engine.stats_snapshot(),
    }))
}

// ─── History ─────────────────────────────────────────────────────────────────

async fn get_history(State(state): State<AppState>, Path(symbol): Path<String>) -> Response {
    match state.engine.snapshot(&symbol).await {
        Some(snap) => Json(json!({
            "symbol": symbol,
            "closes": snap.closes,
        }))
        .into_response(),
        None => not_found("symbol", &symbol),
    }
}

// ─── Observations ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ObservationRequest {
    closes: Vec<f64>,
    #[serde(default)]
    position: f64,
}

async fn post_observation(
    State(state): State<AppState>,
    Json(body): Json<ObservationRequest>,
) -> Response {
    match build_observation(&body.closes, body.position, state.window_size) {
        Some(observation) => Json(json!({
            "window_size": state.window_size,
            "observation": observation,
        }))
        .into_response(),
        None => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "error": "at least 2 closes are required",
                "received": body.closes.len(),
            })),
        )
            .into_response(),
    }
}

async fn get_observation(State(state): State<AppState>, Path(symbol): Path<String>) -> Response {
    let latest = state.observations.read().await.get(&symbol).cloned();
    match latest {
        Some(observation) => Json(json!({
            "symbol": symbol,
            "observation": observation,
        }))
        .into_response(),
        None => not_found("observation", &symbol),
    }
}
