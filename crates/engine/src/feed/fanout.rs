use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use common::{Error, Result, Tick};

use super::rest::build_client;
use crate::stats::PipelineStats;

/// Queue depth between the engine router and the fan-out task.
pub const FANOUT_QUEUE: usize = 256;

#[derive(Debug, Serialize, PartialEq)]
struct TickPayload<'a> {
    symbol: &'a str,
    price: f64,
    ts: i64,
}

/// Best-effort forwarding of every tick to a telemetry endpoint.
pub struct TickFanout {
    url: String,
    http: Client,
    stats: Arc<PipelineStats>,
}

impl TickFanout {
    pub fn new(url: impl Into<String>, timeout: Duration, stats: Arc<PipelineStats>) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            http: build_client(timeout)?,
            stats,
        })
    }

    /// Drain `rx` until the engine drops its sender. Call from `tokio::spawn`.
    pub async fn run(self, mut rx: mpsc::Receiver<Tick>) {
        info!(url = %self.url, "Tick fan-out started");
        while let Some(tick) = rx.recv().await {
            if let Err(e) = self.forward(&tick).await {
                self.stats.record_fanout_failure();
                debug!(symbol = %tick.symbol, error = %e, "Tick fan-out failed");
            }
        }
        debug!("Tick fan-out stopped");
    }

    async fn forward(&self, tick: &Tick) -> Result<()> {
        let resp = self
            .http
            .post(&self.url)
            .json(&payload(tick))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::Http(format!("HTTP {}", resp.status())));
        }
        Ok(())
    }
}

fn payload(tick: &Tick) -> TickPayload<'_> {
    TickPayload {
        symbol: &tick.symbol,
        price: tick.price,
        ts: tick.timestamp_ms,
    }
}
