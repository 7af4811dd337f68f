// =============================================================================
// Candle model and trading timeframes
// =============================================================================
//
// A candle participates in strategy evaluation only once it is fully closed:
// a candle is closed iff `now >= close_time`. The exchange may revise a
// just-closed candle for a few seconds, which is why the store upserts rows
// instead of insert-ignoring them.
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single OHLCV candle. Times are epoch milliseconds as delivered by the
/// exchange. `taker_buy_volume` is retained because the order-flow side
/// channel derives CVD from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub taker_buy_volume: f64,
}

impl Candle {
    /// Whether this candle has fully closed as of `now_ms`.
    pub fn is_closed_at(&self, now_ms: i64) -> bool {
        now_ms >= self.close_time
    }

    /// Candle body size (always non-negative).
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Full range of the bar.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// True when the close is above the open.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Upper wick: distance from the body top to the high.
    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    /// Lower wick: distance from the body bottom to the low.
    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }
}

/// Composite key identifying a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// The timeframes the engine trades and refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// All timeframes the loader keeps fresh, fastest first.
    pub const ALL: [Timeframe; 4] = [Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1];

    /// The fastest traded timeframe — the main loop aligns to its closes.
    pub const FASTEST: Timeframe = Timeframe::M15;

    /// Canonical duration of one candle in milliseconds. A series is dense
    /// iff every consecutive open-time delta equals this value.
    pub fn duration_ms(self) -> i64 {
        match self {
            Timeframe::M15 => 15 * 60 * 1000,
            Timeframe::H1 => 60 * 60 * 1000,
            Timeframe::H4 => 4 * 60 * 60 * 1000,
            Timeframe::D1 => 24 * 60 * 60 * 1000,
        }
    }

    /// Exchange interval token for REST and WebSocket subscriptions.
    pub fn interval(self) -> &'static str {
        match self {
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Timeframe> {
        match s {
            "15m" => Some(Timeframe::M15),
            "1h" => Some(Timeframe::H1),
            "4h" => Some(Timeframe::H4),
            "1d" => Some(Timeframe::D1),
            _ => None,
        }
    }

    /// Open time of the period containing `now_ms`.
    pub fn period_start(self, now_ms: i64) -> i64 {
        now_ms - now_ms.rem_euclid(self.duration_ms())
    }

    /// Open time of the next period after the one containing `now_ms`.
    pub fn next_period_start(self, now_ms: i64) -> i64 {
        self.period_start(now_ms) + self.duration_ms()
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.interval())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 899_999,
            open,
            high,
            low,
            close,
            volume: 10.0,
            taker_buy_volume: 5.0,
        }
    }

    #[test]
    fn closed_exactly_at_close_time() {
        let c = candle(100.0, 101.0, 99.0, 100.5);
        assert!(!c.is_closed_at(899_998));
        assert!(c.is_closed_at(899_999));
        assert!(c.is_closed_at(900_000));
    }

    #[test]
    fn wick_and_body_geometry() {
        let c = candle(100.0, 106.0, 97.0, 103.0);
        assert!((c.body() - 3.0).abs() < 1e-12);
        assert!((c.range() - 9.0).abs() < 1e-12);
        assert!((c.upper_wick() - 3.0).abs() < 1e-12);
        assert!((c.lower_wick() - 3.0).abs() < 1e-12);
        assert!(c.is_bullish());
    }

    #[test]
    fn wicks_for_bearish_candle() {
        let c = candle(103.0, 104.0, 98.0, 100.0);
        assert!(!c.is_bullish());
        assert!((c.upper_wick() - 1.0).abs() < 1e-12);
        assert!((c.lower_wick() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn timeframe_durations() {
        assert_eq!(Timeframe::M15.duration_ms(), 900_000);
        assert_eq!(Timeframe::H1.duration_ms(), 3_600_000);
        assert_eq!(Timeframe::H4.duration_ms(), 14_400_000);
        assert_eq!(Timeframe::D1.duration_ms(), 86_400_000);
    }

    #[test]
    fn timeframe_parse_roundtrip() {
        for tf in Timeframe::ALL {
            assert_eq!(Timeframe::parse(tf.interval()), Some(tf));
        }
        assert_eq!(Timeframe::parse("3m"), None);
    }

    #[test]
    fn period_alignment() {
        let tf = Timeframe::M15;
        // 12:07:30 UTC on some day -> period starts at 12:00.
        let now = 1_700_000_000_000i64;
        let start = tf.period_start(now);
        assert_eq!(start % tf.duration_ms(), 0);
        assert!(start <= now && now < start + tf.duration_ms());
        assert_eq!(tf.next_period_start(now), start + tf.duration_ms());
    }

    #[test]
    fn series_key_display() {
        let key = SeriesKey::new("BTCUSDT", Timeframe::H4);
        assert_eq!(key.to_string(), "BTCUSDT@4h");
    }
}
