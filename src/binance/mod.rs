// =============================================================================
// Binance access layer
// =============================================================================
//
// - `rate_limit` — process-wide request-weight ledger (reserve / observe / ban)
// - `client`     — typed REST facade over the futures market-data endpoints
// - `ws`         — kline WebSocket used only as a candle-close scheduling hint

pub mod client;
pub mod rate_limit;
pub mod ws;

pub use client::{depth_weight, klines_weight, DepthSnapshot, FuturesClient, Ticker24h};
pub use rate_limit::{Permit, RateBudget, RateSnapshot};
