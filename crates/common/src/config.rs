use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::{Error, ExecutionMode, Result};

/// All configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Transport
    pub tick_stream_url: String,
    pub signal_url: String,
    pub history_url: Option<String>,
    pub tick_fanout_url: Option<String>,

    // Pipeline
    pub execution_mode: ExecutionMode,
    pub window_size: usize,
    pub history_margin: usize,
    pub warm_start_margin: usize,
    pub dispatch_timeout: Duration,
    pub fanout_timeout: Duration,

    // Trading calendar
    pub market_open: NaiveTime,
    pub market_close: NaiveTime,
    pub market_utc_offset_minutes: i32,
    pub holidays_path: String,

    // Instruments
    pub symbols_config_path: String,

    // Streaming observer
    pub observation_position: f64,
    pub observation_min_history: Option<usize>,

    // HTTP API
    pub api_port: u16,
    pub api_token: String,
}

impl Config {
    /// Load configuration from the process environment, reading `.env` first
    /// if one exists.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // a missing .env is fine
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let execution_mode = match optional(&lookup, "EXECUTION_MODE")
            .unwrap_or_else(|| "dry_run".to_string())
            .to_lowercase()
            .as_str()
        {
            "dry_run" | "dryrun" | "paper" => ExecutionMode::DryRun,
            "live" => ExecutionMode::Live,
            other => {
                return Err(Error::Config(format!(
                    "EXECUTION_MODE must be 'dry_run' or 'live', got: '{other}'"
                )))
            }
        };

        let window_size: usize = parsed(&lookup, "WINDOW_SIZE", 20)?;
        if window_size == 0 {
            return Err(Error::Config("WINDOW_SIZE must be at least 1".into()));
        }

        Ok(Config {
            tick_stream_url: required(&lookup, "TICK_STREAM_URL")?,
            signal_url: optional(&lookup, "SIGNAL_URL")
                .unwrap_or_else(|| "http://127.0.0.1:4000/api/signal".to_string()),
            history_url: optional(&lookup, "HISTORY_URL"),
            tick_fanout_url: optional(&lookup, "TICK_FANOUT_URL"),
            execution_mode,
            window_size,
            history_margin: parsed(&lookup, "HISTORY_MARGIN", 5)?,
            warm_start_margin: parsed(&lookup, "WARM_START_MARGIN", 10)?,
            dispatch_timeout: Duration::from_secs(parsed(&lookup, "DISPATCH_TIMEOUT_SECS", 3)?),
            fanout_timeout: Duration::from_millis(parsed(&lookup, "FANOUT_TIMEOUT_MS", 1000)?),
            market_open: time_of_day(&lookup, "MARKET_OPEN", "09:15")?,
            market_close: time_of_day(&lookup, "MARKET_CLOSE", "15:30")?,
            market_utc_offset_minutes: parsed(&lookup, "MARKET_UTC_OFFSET_MINUTES", 330)?,
            holidays_path: optional(&lookup, "HOLIDAYS_PATH")
                .unwrap_or_else(|| "data/holidays.json".to_string()),
            symbols_config_path: optional(&lookup, "SYMBOLS_CONFIG_PATH")
                .unwrap_or_else(|| "config/symbols.toml".to_string()),
            observation_position: parsed(&lookup, "OBSERVATION_POSITION", 0.0)?,
            observation_min_history: optional(&lookup, "OBSERVATION_MIN_HISTORY")
                .map(|v| parse_value("OBSERVATION_MIN_HISTORY", &v))
                .transpose()?,
            api_port: parsed(&lookup, "API_PORT", 8080)?,
            api_token: required(&lookup, "API_TOKEN")?,
        })
    }
}

fn required<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Result<String> {
    optional(lookup, key).ok_or_else(|| {
        Error::Config(format!(
            "Required environment variable '{key}' is not set. Check your .env file."
        ))
    })
}

fn optional<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match optional(lookup, key) {
        Some(v) => parse_value(key, &v),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'")))
}

fn time_of_day<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: &str,
) -> Result<NaiveTime> {
    let raw = optional(lookup, key).unwrap_or_else(|| default.to_string());
    NaiveTime::parse_from_str(&raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
        .map_err(|_| Error::Config(format!("{key} must be HH:MM, got: '{raw}'")))
}

/// Instrument list file (TOML).
///
/// Example `config/symbols.toml`:
/// ```toml
/// [[symbol]]
/// name = "NIFTY"
/// exchange = "NSE"
/// token = "99926000"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SymbolFileConfig {
    #[serde(rename = "symbol", default)]
    pub symbols: Vec<SymbolConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SymbolConfig {
    /// Name used in logs, history keys and signal requests.
    pub name: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Provider instrument token.
    pub token: String,
}

fn default_exchange() -> String {
    "NSE".to_string()
}

impl SymbolConfig {
    /// Provider exchange-type code used in subscribe frames.
    pub fn exchange_type(&self) -> u8 {
        match self.exchange.to_uppercase().as_str() {
            "NFO" => 2,
            "BSE" => 3,
            _ => 1,
        }
    }
}

impl SymbolFileConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read symbol config at '{path}': {e}"))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: SymbolFileConfig = toml::from_str(content)?;
        if file.symbols.is_empty() {
            return Err(Error::Config("symbol config lists no instruments".into()));
        }
        Ok(file)
    }
}
