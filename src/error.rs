// =============================================================================
// Error taxonomy — classification drives retry and backoff behaviour
// =============================================================================
//
// Every failure in the engine falls into one of a small set of classes that
// determine how the caller reacts:
//
//   Transient   — network hiccup / 5xx: retry with exponential backoff.
//   RateCapped  — local weight budget exhausted: wait for the bucket reset.
//   Banned      — exchange returned 418/429: all requests blocked until the
//                 ban deadline passes.
//   BadRequest  — 4xx (non-ban): surface to the caller, never retried.
//   Stale       — data too old for this cycle: skip the symbol, not fatal.
//   Invariant   — a bug; the current unit of work is aborted and logged.
// =============================================================================

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transient error: {0}")]
    Transient(String),

    #[error("rate budget exhausted, bucket resets at {resets_at}")]
    RateCapped { resets_at: DateTime<Utc> },

    #[error("banned by exchange until {until}")]
    Banned { until: DateTime<Utc> },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("stale data for {symbol}: {detail}")]
    Stale { symbol: String, detail: String },

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the failure class is eligible for the client's backoff loop.
    /// Only transient failures are retried; everything else either waits on a
    /// shared deadline (rate/ban) or surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }

    /// Classify a reqwest transport failure. Timeouts and connection errors
    /// are transient; anything else (TLS, redirect loops, body decode) is a
    /// bad request from our side.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            EngineError::Transient(err.to_string())
        } else {
            EngineError::BadRequest(err.to_string())
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(EngineError::Transient("reset by peer".into()).is_retryable());
    }

    #[test]
    fn terminal_classes_are_not_retryable() {
        assert!(!EngineError::BadRequest("bad symbol".into()).is_retryable());
        assert!(!EngineError::Banned { until: Utc::now() }.is_retryable());
        assert!(!EngineError::RateCapped { resets_at: Utc::now() }.is_retryable());
        assert!(!EngineError::Invariant("tp2 before tp1".into()).is_retryable());
    }

    #[test]
    fn display_includes_detail() {
        let e = EngineError::Stale {
            symbol: "BTCUSDT".into(),
            detail: "last close 3h old".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("BTCUSDT"));
        assert!(msg.contains("3h old"));
    }
}
