//! Subsystem error types.
//!
//! Each subsystem boundary gets its own `thiserror` enum carrying enough
//! context (url, host, participant id) to log without string-formatting at
//! the call site. `anyhow::Error` takes over at the engine/CLI boundary where
//! causes from several subsystems are combined.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("transport error fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream returned status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("browser worker error fetching {url}: {message}")]
    Browser { url: String, message: String },

    #[error("no transport available for host {host}")]
    NoTransport { host: String },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no split table found for host {host}")]
    NoTable { host: String },

    #[error("malformed response from {host}: {message}")]
    Malformed { host: String, message: String },
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(String),
}
