// =============================================================================
// Kline WebSocket — candle-close scheduling hints
// =============================================================================
//
// The engine schedules its cycles from wall-clock candle boundaries; the
// WebSocket stream exists only to learn closes a little earlier than the
// timer would fire. Each message that carries a closed kline notifies the
// scheduler. The engine runs correctly with the stream down — the hint is an
// optimisation, never a dependency.
//
// Connect timeout is 30s; on any error the caller-facing task reconnects
// with exponential backoff and resubscribes.
// =============================================================================

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::market_data::candle::Timeframe;

const WS_BASE: &str = "wss://fstream.binance.com";

/// WebSocket connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Reconnect backoff bounds.
const RECONNECT_BASE_MS: u64 = 1_000;
const RECONNECT_CAP_MS: u64 = 60_000;

/// Build the combined-stream URL subscribing every symbol on `timeframe`.
fn stream_url(symbols: &[String], timeframe: Timeframe) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@kline_{}", s.to_lowercase(), timeframe.interval()))
        .collect();
    format!("{WS_BASE}/stream?streams={}", streams.join("/"))
}

/// Extract `(symbol, close_time)` from a kline message iff the kline is
/// closed. Tolerates both the combined-stream envelope and the bare payload.
fn parse_close_hint(text: &str) -> Option<(String, i64)> {
    let root: serde_json::Value = serde_json::from_str(text).ok()?;
    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    let k = data.get("k")?;
    if !k["x"].as_bool().unwrap_or(false) {
        return None;
    }

    let symbol = data["s"].as_str()?.to_uppercase();
    let close_time = k["T"].as_i64()?;
    Some((symbol, close_time))
}

/// Run one connection: subscribe, forward close hints to `notify`, return on
/// disconnect so the supervisor loop can reconnect.
async fn run_once(
    symbols: &[String],
    timeframe: Timeframe,
    notify: &Notify,
) -> Result<(), EngineError> {
    let url = stream_url(symbols, timeframe);
    info!(url = %url, "connecting to kline hint stream");

    let (ws_stream, _resp) = timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(&url))
        .await
        .map_err(|_| EngineError::WebSocket("connect timeout".into()))?
        .map_err(|e| EngineError::WebSocket(e.to_string()))?;

    info!(streams = symbols.len(), tf = %timeframe, "kline hint stream connected");
    let (_write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                if let Some((symbol, close_time)) = parse_close_hint(&text) {
                    debug!(symbol = %symbol, close_time, "candle close hint");
                    notify.notify_one();
                }
            }
            Ok(_) => {} // ping/pong/binary handled by tungstenite
            Err(e) => return Err(EngineError::WebSocket(e.to_string())),
        }
    }

    warn!("kline hint stream ended");
    Ok(())
}

/// Supervisor: keep the hint stream alive forever, reconnecting with
/// exponential backoff and resubscribing after every drop. Spawn once at
/// engine startup.
pub async fn run_close_hint_stream(symbols: Vec<String>, timeframe: Timeframe, notify: Arc<Notify>) {
    let mut backoff_ms = RECONNECT_BASE_MS;

    loop {
        match run_once(&symbols, timeframe, &notify).await {
            Ok(()) => {
                backoff_ms = RECONNECT_BASE_MS;
            }
            Err(e) => {
                warn!(error = %e, backoff_ms, "kline hint stream error — reconnecting");
            }
        }
        sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(RECONNECT_CAP_MS);
    }
}
