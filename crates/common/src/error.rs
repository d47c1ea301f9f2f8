use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A historical row or timestamp that could not be interpreted.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The historical-data source was unreachable or reported failure.
    #[error("Historical fetch failed: {0}")]
    Fetch(String),

    /// The decision sink was unreachable, timed out or rejected the request.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
