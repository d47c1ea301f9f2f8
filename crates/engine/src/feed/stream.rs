use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use common::{Error, Result, SymbolConfig, Tick};

/// Subscription mode for last-traded-price updates.
const LTP_MODE: u8 = 1;
/// Feed prices are quoted in minor units.
const PRICE_DIVISOR: f64 = 100.0;

/// Tick WebSocket feed for all configured instruments.
///
/// Subscribes once per connection, maps feed tokens back to symbol names and
/// forwards parsed ticks to the engine. Reconnects with exponential backoff.
pub struct TickStream {
    url: String,
    symbols: Vec<SymbolConfig>,
    tokens: HashMap<String, String>,
    tick_tx: mpsc::Sender<Tick>,
}

impl TickStream {
    pub fn new(
        url: impl Into<String>,
        symbols: Vec<SymbolConfig>,
        tick_tx: mpsc::Sender<Tick>,
    ) -> Self {
        let tokens = symbols
            .iter()
            .map(|s| (s.token.clone(), s.name.clone()))
            .collect();
        Self {
            url: url.into(),
            symbols,
            tokens,
            tick_tx,
        }
    }

    /// Run the stream loop until the engine drops its receiver.
    /// Call this inside a `tokio::spawn`.
    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);
        const MAX_BACKOFF: Duration = Duration::from_secs(60);

        loop {
            if self.tick_tx.is_closed() {
                info!("Tick receiver dropped, stopping stream");
                return;
            }

            info!(url = %self.url, symbols = self.symbols.len(), "Connecting to tick stream");
            match self.connect_once().await {
                Ok(()) => {
                    info!("Tick stream closed cleanly");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!(error = %e, backoff = ?backoff, "Tick stream error, reconnecting");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn connect_once(&self) -> Result<()> {
        let url = Url::parse(&self.url).map_err(|e| Error::WebSocket(e.to_string()))?;
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let frame = subscribe_frame(&self.symbols);
        write
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        info!(tokens = self.tokens.len(), "Subscribed to ticks");

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;
            let text = match msg {
                Message::Text(text) => text,
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Message::Close(_) => break,
                _ => continue,
            };

            match parse_tick_frame(&text, &self.tokens, Utc::now().timestamp_millis()) {
                Ok(Some(tick)) => {
                    if self.tick_tx.send(tick).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(error = %e, "Ignoring unparsable tick frame"),
            }
        }

        Ok(())
    }
}

/// Subscribe request grouping tokens by exchange type.
pub fn subscribe_frame(symbols: &[SymbolConfig]) -> Value {
    let mut by_exchange: BTreeMap<u8, Vec<String>> = BTreeMap::new();
    for s in symbols {
        by_exchange
            .entry(s.exchange_type())
            .or_default()
            .push(s.token.clone());
    }
    let token_list: Vec<Value> = by_exchange
        .into_iter()
        .map(|(exchange_type, tokens)| json!({ "exchangeType": exchange_type, "tokens": tokens }))
        .collect();

    json!({
        "correlationID": "tickbridge",
        "action": 1,
        "params": { "mode": LTP_MODE, "tokenList": token_list },
    })
}

// ─── Tick frame parsing ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TickFrame {
    token: Option<Value>,
    #[serde(alias = "ltp")]
    last_traded_price: Option<Value>,
    exchange_timestamp: Option<Value>,
}

/// Parse one feed frame. `Ok(None)` for frames that are not ticks for a
/// known token (acks, heartbeats, other instruments).
pub fn parse_tick_frame(
    text: &str,
    tokens: &HashMap<String, String>,
    now_ms: i64,
) -> Result<Option<Tick>> {
    let frame: TickFrame = match serde_json::from_str::<Value>(text)? {
        v @ Value::Object(_) => serde_json::from_value(v)?,
        _ => return Ok(None),
    };

    let Some(token) = frame.token.as_ref().and_then(as_token) else {
        return Ok(None);
    };
    let Some(symbol) = tokens.get(&token) else {
        return Ok(None);
    };
    let Some(raw_price) = frame.last_traded_price.as_ref().and_then(as_f64) else {
        return Ok(None);
    };

    let timestamp_ms = frame
        .exchange_timestamp
        .as_ref()
        .and_then(as_f64)
        .map(|ts| ts as i64)
        .unwrap_or(now_ms);

    Ok(Some(Tick::new(
        symbol.clone(),
        raw_price / PRICE_DIVISOR,
        timestamp_ms,
    )))
}

fn as_token(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim_matches('"').to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
