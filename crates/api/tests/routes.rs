use std::sync::Arc;

use api::{router, AppState};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use common::{DecisionSink, ExecutionMode, Result, SignalRequest, Tick, TradingCalendar};
use engine::{Engine, EngineSettings};
use features::ObservationBoard;

const TOKEN: &str = "secret";
const T0: i64 = 1_700_000_040_000;

struct NeverOpen;

impl TradingCalendar for NeverOpen {
    fn is_open(&self, _at: DateTime<Utc>) -> bool {
        false
    }

    fn session_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.date_naive()
    }
}

struct NullSink;

#[async_trait]
impl DecisionSink for NullSink {
    async fn dispatch(&self, _request: &SignalRequest) -> Result<()> {
        Ok(())
    }
}

/// An app whose engine has processed two NIFTY candles and then stopped.
async fn app() -> (Router, ObservationBoard) {
    let (engine, handle) = Engine::new(
        EngineSettings {
            window_size: 3,
            ..EngineSettings::default()
        },
        vec![],
        Arc::new(NullSink),
        Arc::new(NeverOpen),
    );

    let (tx, rx) = mpsc::channel(8);
    let task = tokio::spawn(engine.run(rx));
    for (price, ts) in [(100.0, T0), (101.0, T0 + 60_000), (102.0, T0 + 120_000)] {
        tx.send(Tick::new("NIFTY", price, ts)).await.unwrap();
    }
    drop(tx);
    task.await.unwrap();

    let observations = ObservationBoard::default();
    let state = AppState {
        engine: handle,
        observations: observations.clone(),
        mode: ExecutionMode::DryRun,
        window_size: 3,
        api_token: TOKEN.to_string(),
    };
    (router(state), observations)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_needs_no_token() {
    let (app, _) = app().await;
    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    assert_eq!(v["status"], "ok");
    assert_eq!(v["engine"], "stopped");
    assert_eq!(v["mode"], "dry_run");
}

#[tokio::test]
async fn api_rejects_missing_or_wrong_token() {
    let (app, _) = app().await;
    let req = Request::builder().uri("/api/status").body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/api/status")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_reports_symbols_and_counters() {
    let (app, _) = app().await;
    let resp = app.oneshot(get("/api/status")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    assert_eq!(v["window_size"], 3);
    assert_eq!(v["symbols"]["NIFTY"]["history_len"], 2);
    assert_eq!(v["symbols"]["NIFTY"]["last_close"], 102.0);
    assert_eq!(v["stats"]["ticks"], 3);
    assert_eq!(v["stats"]["skipped_market_closed"], 2);
}

#[tokio::test]
async fn history_returns_closes_or_404() {
    let (app, _) = app().await;
    let resp = app.clone().oneshot(get("/api/history/NIFTY")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["closes"], json!([101.0, 102.0]));

    let resp = app.oneshot(get("/api/history/UNKNOWN")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn observation_endpoint_builds_from_closes() {
    let (app, _) = app().await;
    let resp = app
        .clone()
        .oneshot(post_json(
            "/api/observation",
            json!({"closes": [100.0, 101.0, 99.0], "position": 1.0}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let obs = body_json(resp).await["observation"].as_array().unwrap().clone();
    assert_eq!(obs.len(), 4);
    assert_eq!(obs[0], 0.0);
    assert_eq!(obs[3], 1.0);

    let resp = app
        .oneshot(post_json("/api/observation", json!({"closes": [100.0]})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn streaming_observation_is_served_when_ready() {
    let (app, board) = app().await;
    let resp = app.clone().oneshot(get("/api/observation/NIFTY")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    board
        .write()
        .await
        .insert("NIFTY".to_string(), vec![0.0, 1.0, -1.0, 0.0]);
    let resp = app.oneshot(get("/api/observation/NIFTY")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["observation"], json!([0.0, 1.0, -1.0, 0.0]));
}
