// =============================================================================
// Central Application State — Meridian signal engine
// =============================================================================
//
// The single wiring point for the engine. Every subsystem manages its own
// interior mutability; AppState ties them together and carries the few
// process-wide counters (cycle counter, dropped-tick counter) plus the
// bounded ring of recent scoring decisions.
//
// Thread safety:
//   - Atomic counters for lock-free reads.
//   - parking_lot::RwLock for the mutable collections.
//   - Arc wrappers for subsystems shared across tasks.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::binance::{FuturesClient, RateBudget, RateSnapshot};
use crate::config::EngineConfig;
use crate::indicators::IndicatorCache;
use crate::journal::Journal;
use crate::market_data::{CandleLoader, FlowRegistry, Store};
use crate::regime::RegimeDetector;
use crate::scoring::DecisionRecord;
use crate::tracker::SignalLockTable;
use crate::zones::ZoneRegistry;

/// Bounded size of the recent-decision ring.
const MAX_RECENT_DECISIONS: usize = 200;

pub struct AppState {
    // ── Configuration ───────────────────────────────────────────────────
    pub config: RwLock<EngineConfig>,

    // ── Persistence & exchange access ───────────────────────────────────
    pub store: Arc<Store>,
    pub rate_budget: Arc<RateBudget>,
    pub client: Arc<FuturesClient>,
    pub loader: Arc<CandleLoader>,

    // ── Analysis subsystems ─────────────────────────────────────────────
    pub indicator_cache: Arc<IndicatorCache>,
    pub zones: Arc<ZoneRegistry>,
    pub regimes: Arc<RegimeDetector>,
    pub flow: Arc<FlowRegistry>,

    // ── Signal lifecycle ────────────────────────────────────────────────
    pub locks: Arc<SignalLockTable>,
    pub journal: Arc<Journal>,

    // ── Decision audit ring ─────────────────────────────────────────────
    pub recent_decisions: RwLock<Vec<DecisionRecord>>,

    // ── Counters ────────────────────────────────────────────────────────
    pub cycle_counter: AtomicU64,
    pub dropped_ticks: AtomicU64,
    pub last_cycle_duration_ms: AtomicU64,

    pub start_time: std::time::Instant,
}

/// Serializable status summary for the health surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub uptime_secs: u64,
    pub cycles: u64,
    pub dropped_ticks: u64,
    pub last_cycle_duration_ms: u64,
    pub rate: RateSnapshot,
    pub recent_decisions: usize,
}

impl AppState {
    /// Wire every subsystem from the loaded config and an opened store.
    pub fn new(config: EngineConfig, store: Arc<Store>, journal: Arc<Journal>) -> Arc<Self> {
        let rate_budget = Arc::new(RateBudget::new(config.rate.clone()));
        let client = Arc::new(FuturesClient::new(Arc::clone(&rate_budget)));
        let loader = Arc::new(CandleLoader::new(
            Arc::clone(&client),
            Arc::clone(&store),
            config.loader.clone(),
        ));
        let locks = Arc::new(SignalLockTable::new(Arc::clone(&store)));

        Arc::new(Self {
            config: RwLock::new(config),
            store,
            rate_budget,
            client,
            loader,
            indicator_cache: Arc::new(IndicatorCache::new()),
            zones: Arc::new(ZoneRegistry::new()),
            regimes: Arc::new(RegimeDetector::new()),
            flow: Arc::new(FlowRegistry::new()),
            locks,
            journal,
            recent_decisions: RwLock::new(Vec::new()),
            cycle_counter: AtomicU64::new(0),
            dropped_ticks: AtomicU64::new(0),
            last_cycle_duration_ms: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
        })
    }

    /// Append a decision to the bounded ring (oldest evicted) and mirror it
    /// into the decision journal.
    pub fn push_decision(&self, record: DecisionRecord) {
        self.journal.record_decision(&record);
        let mut ring = self.recent_decisions.write();
        ring.push(record);
        if ring.len() > MAX_RECENT_DECISIONS {
            let overflow = ring.len() - MAX_RECENT_DECISIONS;
            ring.drain(..overflow);
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            cycles: self.cycle_counter.load(Ordering::Relaxed),
            dropped_ticks: self.dropped_ticks.load(Ordering::Relaxed),
            last_cycle_duration_ms: self.last_cycle_duration_ms.load(Ordering::Relaxed),
            rate: self.rate_budget.snapshot(),
            recent_decisions: self.recent_decisions.read().len(),
        }
    }
}
