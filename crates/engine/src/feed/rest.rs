use std::time::Duration;

use async_trait::async_trait;
use chrono::FixedOffset;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use common::{
    CandleRequest, DecisionSink, Error, HistoricalSource, RawCandleRow, Result, SignalRequest,
};

const HISTORY_INTERVAL: &str = "ONE_MINUTE";
const HISTORY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";
const HISTORY_TIMEOUT: Duration = Duration::from_secs(10);
/// How much of a sink response body is logged.
const BODY_PREVIEW: usize = 200;

/// Shared by every outbound HTTP client in the engine.
pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Http(e.to_string()))
}

// ─── Historical candles ──────────────────────────────────────────────────────

/// Candle-data endpoint used for warm start.
pub struct HttpHistoricalSource {
    url: String,
    offset: FixedOffset,
    http: Client,
}

impl HttpHistoricalSource {
    /// `offset` is the exchange's local offset; request dates are sent in it.
    pub fn new(url: impl Into<String>, offset: FixedOffset) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            offset,
            http: build_client(HISTORY_TIMEOUT)?,
        })
    }
}

#[async_trait]
impl HistoricalSource for HttpHistoricalSource {
    async fn fetch_candles(&self, req: &CandleRequest) -> Result<Vec<RawCandleRow>> {
        let body = candle_request_body(req, self.offset);
        debug!(symbol = %req.symbol, body = %body, "Requesting candle data");

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Fetch(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Fetch(format!("HTTP {status}: {}", preview(&text))));
        }
        parse_candle_response(&text)
    }
}

pub fn candle_request_body(req: &CandleRequest, offset: FixedOffset) -> Value {
    json!({
        "exchange": req.exchange.to_uppercase(),
        "symboltoken": req.token,
        "interval": HISTORY_INTERVAL,
        "fromdate": req.from.with_timezone(&offset).format(HISTORY_DATE_FORMAT).to_string(),
        "todate": req.to.with_timezone(&offset).format(HISTORY_DATE_FORMAT).to_string(),
    })
}

#[derive(Deserialize)]
struct CandleResponse {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Vec<RawCandleRow>>,
}

/// `{status, message?, data?}`; `status == false` is a fetch error, missing
/// data is an empty result.
pub fn parse_candle_response(text: &str) -> Result<Vec<RawCandleRow>> {
    let resp: CandleResponse = serde_json::from_str(text)?;
    if !resp.status {
        let message = resp.message.unwrap_or_else(|| "unknown error".to_string());
        return Err(Error::Fetch(format!("source reported failure: {message}")));
    }
    Ok(resp.data.unwrap_or_default())
}

// ─── Decision sink ───────────────────────────────────────────────────────────

/// Posts signal requests to the decision service.
pub struct HttpDecisionSink {
    url: String,
    http: Client,
}

impl HttpDecisionSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            http: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl DecisionSink for HttpDecisionSink {
    async fn dispatch(&self, request: &SignalRequest) -> Result<()> {
        let resp = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Dispatch(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        info!(
            symbol = %request.symbol,
            status = status.as_u16(),
            body = %preview(&text),
            "Signal response"
        );

        if !status.is_success() {
            return Err(Error::Dispatch(format!("HTTP {status}")));
        }
        Ok(())
    }
}

/// First [`BODY_PREVIEW`] characters, on a char boundary.
fn preview(text: &str) -> &str {
    match text.char_indices().nth(BODY_PREVIEW) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
