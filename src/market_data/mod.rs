// =============================================================================
// Market Data
// =============================================================================
//
// - `candle` — OHLCV model and the traded timeframes
// - `store`  — SQLite persistence (candles, signals, locks, rate ledger)
// - `loader` — gap-free refresh pipeline over the exchange client
// - `flow`   — depth imbalance / CVD / open-interest side channels

pub mod candle;
pub mod flow;
pub mod loader;
pub mod store;

pub use candle::{Candle, SeriesKey, Timeframe};
pub use flow::{FlowRegistry, FlowSnapshot};
pub use loader::CandleLoader;
pub use store::{SignalStats, Store};
