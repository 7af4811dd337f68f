// =============================================================================
// Binance Futures REST Client — typed, weight-accounted market data access
// =============================================================================
//
// Every call declares its request weight up front, reserves it from the
// shared [`RateBudget`] before the request leaves the process, and reconciles
// the ledger with the `X-MBX-USED-WEIGHT-1M` response header afterwards.
//
// Failure classification:
//   - network / 5xx        => Transient, retried with exponential backoff
//                             (1s base, factor 2, 30s cap, 5 attempts max)
//   - 418 / 429            => Banned; the shared budget is tripped with the
//                             server's Retry-After and the error surfaces
//   - other 4xx            => BadRequest, surfaced without retry
// =============================================================================

use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use std::sync::Arc;

use crate::binance::rate_limit::RateBudget;
use crate::error::EngineError;
use crate::market_data::candle::{Candle, Timeframe};

const BASE_URL: &str = "https://fapi.binance.com";

/// Total per-request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Backoff envelope for transient failures.
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_FACTOR: u64 = 2;
const BACKOFF_CAP_MS: u64 = 30_000;
const MAX_ATTEMPTS: u32 = 5;

/// Ban length assumed when the exchange omits Retry-After.
const DEFAULT_BAN_SECS: i64 = 60;

// =============================================================================
// Weight bands — a testable contract
// =============================================================================

/// Request weight of a klines call as a function of the requested limit.
pub fn klines_weight(limit: u32) -> u32 {
    match limit {
        0..=99 => 1,
        100..=499 => 2,
        500..=1000 => 5,
        _ => 10,
    }
}

/// Request weight of a depth call as a function of the requested limit.
/// Limits above 5000 are clamped by the exchange and billed at the top band.
pub fn depth_weight(limit: u32) -> u32 {
    match limit {
        0..=100 => 2,
        101..=500 => 5,
        501..=1000 => 10,
        _ => 50,
    }
}

// =============================================================================
// Response models
// =============================================================================

/// One side of an order book snapshot: (price, quantity) levels.
pub type BookLevels = Vec<(f64, f64)>;

/// Order book snapshot from the depth endpoint.
#[derive(Debug, Clone)]
pub struct DepthSnapshot {
    pub last_update_id: u64,
    pub bids: BookLevels,
    pub asks: BookLevels,
}

impl DepthSnapshot {
    /// Depth imbalance in [-1, +1]: positive when bids outweigh asks.
    pub fn imbalance(&self) -> f64 {
        let bid: f64 = self.bids.iter().map(|(p, q)| p * q).sum();
        let ask: f64 = self.asks.iter().map(|(p, q)| p * q).sum();
        let total = bid + ask;
        if total > 0.0 {
            (bid - ask) / total
        } else {
            0.0
        }
    }
}

/// 24-hour rolling ticker statistics.
#[derive(Debug, Clone)]
pub struct Ticker24h {
    pub symbol: String,
    pub last_price: f64,
    pub price_change_percent: f64,
    pub quote_volume: f64,
}

/// Tradable-symbol entry from exchange info.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    #[serde(rename = "contractType", default)]
    pub contract_type: String,
}

// =============================================================================
// FuturesClient
// =============================================================================

/// REST facade over the Binance USDT-M futures market-data endpoints.
#[derive(Clone)]
pub struct FuturesClient {
    base_url: String,
    http: reqwest::Client,
    budget: Arc<RateBudget>,
}

impl FuturesClient {
    pub fn new(budget: Arc<RateBudget>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        debug!(base_url = BASE_URL, "FuturesClient initialised");

        Self {
            base_url: BASE_URL.to_string(),
            http,
            budget,
        }
    }

    /// Override the base URL (test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    // -------------------------------------------------------------------------
    // Core request path: reserve -> send -> observe -> classify -> retry
    // -------------------------------------------------------------------------

    /// Issue a GET with the declared weight, retrying transient failures
    /// within the backoff envelope. Rate and ban errors propagate so the
    /// whole phase backs off via the shared ledger.
    async fn get_json(
        &self,
        path: &str,
        query: &str,
        weight: u32,
        deadline_ms: i64,
    ) -> Result<serde_json::Value, EngineError> {
        let mut attempt: u32 = 0;

        loop {
            let permit = self.budget.reserve(weight, deadline_ms).await?;
            debug!(path, weight = permit.weight, "request weight reserved");

            match self.send_once(path, query).await {
                Ok(body) => return Ok(body),
                Err(err) if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff = (BACKOFF_BASE_MS * BACKOFF_FACTOR.pow(attempt)).min(BACKOFF_CAP_MS);
                    attempt += 1;
                    warn!(
                        path,
                        attempt,
                        backoff_ms = backoff,
                        error = %err,
                        "transient exchange error — backing off"
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(&self, path: &str, query: &str) -> Result<serde_json::Value, EngineError> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(EngineError::from_transport)?;

        // Reconcile the ledger with the server counter on every response.
        if let Some(used) = resp
            .headers()
            .get("X-MBX-USED-WEIGHT-1M")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        {
            self.budget.observe_used(used);
        }

        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            let retry_after_secs = resp
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(DEFAULT_BAN_SECS);
            let until_ms = chrono::Utc::now().timestamp_millis() + retry_after_secs * 1_000;
            self.budget.trip_ban(until_ms);
            return Err(EngineError::Banned {
                until: chrono::DateTime::from_timestamp_millis(until_ms)
                    .unwrap_or_else(chrono::Utc::now),
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;

        if status.is_server_error() {
            return Err(EngineError::Transient(format!("HTTP {status}: {body}")));
        }
        if status.is_client_error() {
            return Err(EngineError::BadRequest(format!("HTTP {status}: {body}")));
        }

        serde_json::from_str(&body)
            .map_err(|e| EngineError::BadRequest(format!("malformed exchange response: {e}")))
    }

    // -------------------------------------------------------------------------
    // Klines
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/klines — fetch up to `limit` candles, optionally starting
    /// at `start_time_ms`. The last element may be a not-yet-closed candle;
    /// the loader is responsible for dropping it.
    ///
    /// Array indices:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
    ///   [6] closeTime, [7] quoteVolume, [8] trades, [9] takerBuyBaseVolume
    pub async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
        start_time_ms: Option<i64>,
        deadline_ms: i64,
    ) -> Result<Vec<Candle>, EngineError> {
        let mut query = format!(
            "symbol={}&interval={}&limit={}",
            symbol,
            timeframe.interval(),
            limit
        );
        if let Some(start) = start_time_ms {
            query.push_str(&format!("&startTime={start}"));
        }

        let body = self
            .get_json("/fapi/v1/klines", &query, klines_weight(limit), deadline_ms)
            .await?;

        let raw = body
            .as_array()
            .ok_or_else(|| EngineError::BadRequest("klines response is not an array".into()))?;

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = match entry.as_array() {
                Some(arr) if arr.len() >= 10 => arr,
                _ => {
                    warn!(symbol, "skipping malformed kline entry");
                    continue;
                }
            };

            candles.push(Candle {
                open_time: arr[0].as_i64().unwrap_or(0),
                open: parse_str_f64(&arr[1])?,
                high: parse_str_f64(&arr[2])?,
                low: parse_str_f64(&arr[3])?,
                close: parse_str_f64(&arr[4])?,
                volume: parse_str_f64(&arr[5])?,
                close_time: arr[6].as_i64().unwrap_or(0),
                taker_buy_volume: parse_str_f64(&arr[9])?,
            });
        }

        debug!(symbol, tf = %timeframe, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    // -------------------------------------------------------------------------
    // Depth / mark price / ticker / exchange info / open interest
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/depth — order book snapshot with `limit` levels per side.
    pub async fn get_depth(
        &self,
        symbol: &str,
        limit: u32,
        deadline_ms: i64,
    ) -> Result<DepthSnapshot, EngineError> {
        let query = format!("symbol={symbol}&limit={limit}");
        let body = self
            .get_json("/fapi/v1/depth", &query, depth_weight(limit), deadline_ms)
            .await?;

        let parse_side = |side: &serde_json::Value| -> Result<BookLevels, EngineError> {
            side.as_array()
                .ok_or_else(|| EngineError::BadRequest("depth side is not an array".into()))?
                .iter()
                .map(|level| {
                    let pair = level
                        .as_array()
                        .filter(|a| a.len() >= 2)
                        .ok_or_else(|| EngineError::BadRequest("malformed depth level".into()))?;
                    Ok((parse_str_f64(&pair[0])?, parse_str_f64(&pair[1])?))
                })
                .collect()
        };

        Ok(DepthSnapshot {
            last_update_id: body["lastUpdateId"].as_u64().unwrap_or(0),
            bids: parse_side(&body["bids"])?,
            asks: parse_side(&body["asks"])?,
        })
    }

    /// GET /fapi/v1/premiumIndex — current mark price for `symbol`.
    pub async fn get_mark_price(&self, symbol: &str, deadline_ms: i64) -> Result<f64, EngineError> {
        let query = format!("symbol={symbol}");
        let body = self
            .get_json("/fapi/v1/premiumIndex", &query, 1, deadline_ms)
            .await?;
        parse_str_f64(&body["markPrice"])
    }

    /// GET /fapi/v1/ticker/24hr for a single symbol.
    pub async fn get_ticker_24h(
        &self,
        symbol: &str,
        deadline_ms: i64,
    ) -> Result<Ticker24h, EngineError> {
        let query = format!("symbol={symbol}");
        let body = self
            .get_json("/fapi/v1/ticker/24hr", &query, 1, deadline_ms)
            .await?;

        Ok(Ticker24h {
            symbol: body["symbol"].as_str().unwrap_or(symbol).to_string(),
            last_price: parse_str_f64(&body["lastPrice"])?,
            price_change_percent: parse_str_f64(&body["priceChangePercent"])?,
            quote_volume: parse_str_f64(&body["quoteVolume"])?,
        })
    }

    /// GET /fapi/v1/exchangeInfo — all tradable perpetual symbols.
    pub async fn get_exchange_info(&self, deadline_ms: i64) -> Result<Vec<SymbolInfo>, EngineError> {
        let body = self.get_json("/fapi/v1/exchangeInfo", "", 1, deadline_ms).await?;

        let symbols = body["symbols"]
            .as_array()
            .ok_or_else(|| EngineError::BadRequest("exchangeInfo missing symbols".into()))?;

        let infos = symbols
            .iter()
            .filter_map(|s| serde_json::from_value::<SymbolInfo>(s.clone()).ok())
            .collect();
        Ok(infos)
    }

    /// GET /fapi/v1/openInterest — outstanding contracts for `symbol`.
    pub async fn get_open_interest(
        &self,
        symbol: &str,
        deadline_ms: i64,
    ) -> Result<f64, EngineError> {
        let query = format!("symbol={symbol}");
        let body = self
            .get_json("/fapi/v1/openInterest", &query, 1, deadline_ms)
            .await?;
        parse_str_f64(&body["openInterest"])
    }
}

impl std::fmt::Debug for FuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuturesClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Internal helpers
// =============================================================================

/// Parse a JSON value that may be either a string or a number into `f64` —
/// Binance sends numeric fields as strings in most payloads.
fn parse_str_f64(val: &serde_json::Value) -> Result<f64, EngineError> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .map_err(|_| EngineError::BadRequest(format!("failed to parse '{s}' as f64")))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        Err(EngineError::BadRequest(format!(
            "expected string or number, got: {val}"
        )))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn klines_weight_bands() {
        assert_eq!(klines_weight(1), 1);
        assert_eq!(klines_weight(99), 1);
        assert_eq!(klines_weight(100), 2);
        assert_eq!(klines_weight(499), 2);
        assert_eq!(klines_weight(500), 5);
        assert_eq!(klines_weight(1000), 5);
        assert_eq!(klines_weight(1001), 10);
        assert_eq!(klines_weight(1500), 10);
    }

    #[test]
    fn depth_weight_bands() {
        assert_eq!(depth_weight(1), 2);
        assert_eq!(depth_weight(100), 2);
        assert_eq!(depth_weight(101), 5);
        assert_eq!(depth_weight(500), 5);
        assert_eq!(depth_weight(501), 10);
        assert_eq!(depth_weight(1000), 10);
        assert_eq!(depth_weight(1001), 50);
        assert_eq!(depth_weight(5000), 50);
    }

    #[test]
    fn parse_str_f64_accepts_both_shapes() {
        assert!((parse_str_f64(&serde_json::json!("37020.5")).unwrap() - 37020.5).abs() < 1e-9);
        assert!((parse_str_f64(&serde_json::json!(42.0)).unwrap() - 42.0).abs() < 1e-9);
        assert!(parse_str_f64(&serde_json::json!("not a number")).is_err());
        assert!(parse_str_f64(&serde_json::json!(null)).is_err());
    }

    #[test]
    fn depth_imbalance_sign() {
        let snap = DepthSnapshot {
            last_update_id: 1,
            bids: vec![(100.0, 10.0)], // 1000 notional
            asks: vec![(101.0, 2.0)],  // 202 notional
        };
        let imb = snap.imbalance();
        assert!(imb > 0.0, "bid-heavy book must have positive imbalance");
        assert!(imb <= 1.0);

        let flipped = DepthSnapshot {
            last_update_id: 1,
            bids: vec![(100.0, 2.0)],
            asks: vec![(101.0, 10.0)],
        };
        assert!(flipped.imbalance() < 0.0);
    }

    #[test]
    fn depth_imbalance_empty_book_is_zero() {
        let snap = DepthSnapshot {
            last_update_id: 0,
            bids: vec![],
            asks: vec![],
        };
        assert_eq!(snap.imbalance(), 0.0);
    }

    #[test]
    fn backoff_envelope_shape() {
        // 1s, 2s, 4s, 8s, 16s — all within the 30s cap for 5 attempts.
        let delays: Vec<u64> = (0..MAX_ATTEMPTS)
            .map(|a| (BACKOFF_BASE_MS * BACKOFF_FACTOR.pow(a)).min(BACKOFF_CAP_MS))
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000]);
        // A sixth attempt would clamp to the cap.
        assert_eq!((BACKOFF_BASE_MS * BACKOFF_FACTOR.pow(5)).min(BACKOFF_CAP_MS), 30_000);
    }
}
